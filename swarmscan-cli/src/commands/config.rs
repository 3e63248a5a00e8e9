//! Print the default configuration.

use crate::config::Config;
use crate::output;

/// Run the config command.
pub fn run() -> i32 {
    match Config::default().to_toml() {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            output::error(&format!("Failed to render configuration: {}", e));
            1
        }
    }
}
