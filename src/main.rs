mod auth;
mod channels;
mod cli;
mod config;
mod gateway;
mod memory;
mod pipeline;
mod policy;
mod rate_limit;
mod session;
mod tools;
mod types;
mod util;

#[allow(unused_imports)]
pub(crate) use auth::*;
#[allow(unused_imports)]
pub(crate) use channels::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use gateway::*;
#[allow(unused_imports)]
pub(crate) use memory::*;
#[allow(unused_imports)]
pub(crate) use pipeline::*;
#[allow(unused_imports)]
pub(crate) use policy::*;
#[allow(unused_imports)]
pub(crate) use rate_limit::*;
#[allow(unused_imports)]
pub(crate) use session::*;
#[allow(unused_imports)]
pub(crate) use tools::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;

use clap::Parser;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind, port, config } => {
            let path = config.unwrap_or_else(default_config_path);
            run_gateway(&bind, port, path)?;
        }
        Command::CheckConfig { config } => {
            let path = config.unwrap_or_else(default_config_path);
            let cfg = match load_gateway_config(&path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };
            println!("{}", config_summary(&cfg));
            let warnings = validate_gateway_config(&cfg);
            for warning in &warnings {
                println!("warning: {warning}");
            }
            if warnings.is_empty() {
                println!("config ok");
            }
        }
        Command::Tools {
            config,
            session,
            channel,
            account,
            json,
        } => {
            let path = config.unwrap_or_else(default_config_path);
            let cfg = load_gateway_config(&path)?;
            let ctx = PolicyCallContext {
                channel: channel.as_deref(),
                account_id: account.as_deref(),
            };
            let tools = filter_tools_for_session(&cfg, &session, &ctx);
            if json {
                let entries: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "elevated": t.meta.elevated,
                            "dangerous": t.meta.dangerous,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for tool in &tools {
                    println!("{}", tool.name);
                }
            }
        }
    }
    Ok(())
}
