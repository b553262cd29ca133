//! Endpoint command - show where the tracking stream would connect.

use console::style;

use cr_core::config::AppConfig;
use cr_core::error::CrResult;
use cr_tracking::Endpoint;

use crate::OutputFormat;

/// Run the endpoint command.
pub fn run(config: &AppConfig, address: Option<String>, format: OutputFormat) -> CrResult<()> {
    let address = super::resolve_address(config, address)?;
    let endpoint = Endpoint::from_config(&address, &config.tracking)?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "server": address,
                "endpoint": endpoint.to_string(),
                "secure": endpoint.is_secure(),
            });
            println!("{json}");
        }
        OutputFormat::Text => {
            println!("  Server:   {address}");
            println!("  Endpoint: {}", style(&endpoint).cyan());
            println!(
                "  Secure:   {}",
                if endpoint.is_secure() {
                    style("yes").green()
                } else {
                    style("no").yellow()
                }
            );
        }
    }

    Ok(())
}
