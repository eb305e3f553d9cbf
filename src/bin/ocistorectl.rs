use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oci_spec::image::{DescriptorBuilder, MediaType};
use sha2::{Digest, Sha256};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use ocistore::{clean_path, OciDir, OciDirConfig, Reference};

/// ocistorectl
#[derive(Debug, Parser)]
#[clap(name = "ocistorectl", version)]
pub struct App {
    /// Directory holding the layouts; layout paths are relative to it
    #[clap(long, default_value = ".")]
    root: PathBuf,
    /// TOML file with engine settings
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Creates an empty layout
    Init { layout: String },
    /// Checks the layout version marker
    Validate { layout: String },
    /// Prints index.json
    Index { layout: String },
    /// Prints the descriptor a reference resolves to
    Resolve {
        /// layout[:tag][@digest]
        reference: String,
    },
    /// Stores a manifest blob and points a tag (or its digest) at it
    Tag {
        /// layout[:tag]
        reference: String,
        manifest: PathBuf,
        /// defaults to the manifest's own mediaType, or the OCI image manifest type
        #[clap(long)]
        media_type: Option<String>,
    },
    /// Lists the tags of a layout
    Tags { layout: String },
    /// Removes a tag, or the untagged entries of a digest
    Untag { reference: String },
}

fn manifest_media_type(manifest: &[u8]) -> MediaType {
    serde_json::from_slice::<serde_json::Value>(manifest)
        .ok()
        .and_then(|value| value.get("mediaType")?.as_str().map(MediaType::from))
        .unwrap_or(MediaType::ImageManifest)
}

fn write_blob(dir: &OciDir, layout: &str, digest: &str, content: &[u8]) -> Result<()> {
    let Some(hex) = digest.strip_prefix("sha256:") else {
        anyhow::bail!("unsupported digest {digest}");
    };
    let blobs = clean_path(&format!("{layout}/blobs/sha256"));
    let target = format!("{blobs}/{hex}");
    if dir.fs().stat(&target).is_ok() {
        return Ok(());
    }
    dir.fs()
        .mkdir_all(&blobs)
        .with_context(|| format!("Creating {blobs}"))?;
    let mut tmp = dir
        .fs()
        .create_temp(&blobs, ".blob-*.tmp")
        .with_context(|| format!("Creating temporary blob in {blobs}"))?;
    tmp.file.write_all(content).context("Writing blob")?;
    tmp.file.close().context("Closing blob")?;
    dir.fs()
        .rename(&tmp.path, &target)
        .with_context(|| format!("Renaming blob to {target}"))?;
    Ok(())
}

fn tag(dir: &OciDir, r: &Reference, manifest: PathBuf, media_type: Option<String>) -> Result<()> {
    let content = std::fs::read(&manifest)
        .with_context(|| format!("Reading {}", manifest.display()))?;
    let digest = format!("sha256:{}", hex::encode(Sha256::digest(&content)));
    let media_type = match media_type {
        Some(media_type) => MediaType::from(media_type.as_str()),
        None => manifest_media_type(&content),
    };
    let descriptor = DescriptorBuilder::default()
        .media_type(media_type)
        .digest(digest.parse::<oci_spec::image::Digest>()?)
        .size(content.len() as u64)
        .build()?;

    dir.gc_lock(r);
    let result = write_blob(dir, &r.path_key(), &digest, &content).and_then(|()| {
        dir.update_index(r, descriptor, false)
            .context("Updating index")
    });
    dir.mark_modified(r);
    dir.gc_unlock(r);
    result?;

    println!("{digest}");
    Ok(())
}

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    let log = Dispatch::new(subscriber);

    let args = App::parse();

    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Reading {}", path.display()))?;
            OciDirConfig::from_toml(&content)
                .with_context(|| format!("Parsing {}", path.display()))?
        }
        None => OciDirConfig::default(),
    };
    config.log = Some(log);

    let dir = OciDir::open_dir(&args.root, config)?;

    match args.cmd {
        Command::Init { layout } => {
            dir.init_index(&Reference::new(layout))?;
        }
        Command::Validate { layout } => {
            dir.valid(&Reference::new(layout))?;
        }
        Command::Index { layout } => {
            let index = dir.read_index(&Reference::new(layout))?;
            println!("{}", serde_json::to_string_pretty(&index)?);
        }
        Command::Resolve { reference } => {
            let descriptor = dir.resolve(&Reference::parse(&reference))?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Tag {
            reference,
            manifest,
            media_type,
        } => {
            tag(&dir, &Reference::parse(&reference), manifest, media_type)?;
        }
        Command::Tags { layout } => {
            for tag in dir.tag_list(&Reference::new(layout))? {
                println!("{tag}");
            }
        }
        Command::Untag { reference } => {
            dir.tag_delete(&Reference::parse(&reference))?;
        }
    }

    Ok(())
}
