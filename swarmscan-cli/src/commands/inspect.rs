//! Print the header of a digest or log file.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use swarmscan_core::{ContainerKind, Digest, ScanContainer, ScanLog};

use crate::output;

#[derive(Args)]
pub struct InspectArgs {
    /// Container file to inspect
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct Header {
    kind: String,
    path: String,
    scanner: String,
    sig_version: String,
    sig_date: String,
    capacity: u32,
    urls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keys: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hits: Option<u64>,
}

impl Header {
    fn of<C: ScanContainer>(container: &C) -> Self {
        let sig = container.siginfo();
        Self {
            kind: C::KIND.to_string(),
            path: container.path().display().to_string(),
            scanner: sig.scanner.clone(),
            sig_version: sig.sig_version.clone(),
            sig_date: sig.sig_date.to_rfc3339(),
            capacity: container.capacity(),
            urls: container.len(),
            nonce: None,
            keys: None,
            hits: None,
        }
    }
}

fn read_header(path: &Path) -> anyhow::Result<Header> {
    let looks_like_log = path.extension().is_some_and(|ext| ext == "log");
    let digest = || -> anyhow::Result<Header> {
        let digest = Digest::load(path)?;
        Ok(Header {
            nonce: Some(digest.nonce()),
            ..Header::of(&digest)
        })
    };
    let log = || -> anyhow::Result<Header> {
        let log = ScanLog::load(path)?;
        Ok(Header {
            keys: Some(log.key_count()),
            hits: Some(log.hits()),
            ..Header::of(&log)
        })
    };
    if looks_like_log {
        log()
    } else {
        digest().or_else(|_| log())
    }
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> i32 {
    let header = match read_header(&args.file) {
        Ok(h) => h,
        Err(e) => {
            output::error(&format!("Not a readable container: {}: {}", args.file.display(), e));
            return 1;
        }
    };

    if args.json {
        return match serde_json::to_string_pretty(&header) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                output::error(&format!("Failed to encode header: {}", e));
                1
            }
        };
    }

    let title = if header.kind == ContainerKind::Digest.to_string() {
        "Scan Digest"
    } else {
        "Scan Log"
    };
    output::header(title);
    output::kv("Path", &header.path);
    output::kv("Scanner", &header.scanner);
    output::kv("Signatures", &format!("{} ({})", header.sig_version, header.sig_date));
    output::kv("Objects", &format!("{} / {}", header.urls, header.capacity));
    if let Some(nonce) = header.nonce {
        output::kv("Nonce", &format!("{:#010x}", nonce));
    }
    if let Some(keys) = header.keys {
        output::kv("Keys", &keys.to_string());
    }
    if let Some(hits) = header.hits {
        output::kv("Hits", &hits.to_string());
    }
    println!();
    0
}
