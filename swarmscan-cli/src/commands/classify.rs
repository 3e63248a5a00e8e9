//! Ask a running core about one URL.

use std::time::Duration;

use clap::Args;
use serde::Serialize;
use swarmscan_p2p::query_proxy;

use crate::output;

/// Exit code for a denied URL.
pub const EXIT_DENY: i32 = 2;

#[derive(Args)]
pub struct ClassifyArgs {
    /// URL of the object to classify
    pub url: String,

    /// Address of the core's proxy listener
    #[arg(long, default_value = "127.0.0.1:8123")]
    pub core: String,

    /// Seconds to wait for the verdict
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    url: &'a str,
    allowed: bool,
    redirect: &'a str,
}

/// Run the classify command.
pub async fn run(args: ClassifyArgs) -> i32 {
    let verdict = match query_proxy(&args.core, &args.url, Duration::from_secs(args.timeout)).await {
        Ok(v) => v,
        Err(e) => {
            output::error(&format!(
                "Could not classify via {}: {} (is `swarmscan serve` running there?)",
                args.core, e
            ));
            return 1;
        }
    };

    let allowed = verdict.is_empty();
    if args.json {
        let out = JsonOutput {
            url: &args.url,
            allowed,
            redirect: &verdict,
        };
        match serde_json::to_string_pretty(&out) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                output::error(&format!("Failed to encode verdict: {}", e));
                return 1;
            }
        }
    } else {
        output::verdict(&args.url, &verdict);
    }

    if allowed {
        0
    } else {
        EXIT_DENY
    }
}
