//! storefront - command-line access to the storefront API.
//!
//! Issues authenticated requests through the shared client pipeline, so an
//! expired token is refreshed and the request replayed transparently.

use std::io;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use storefront_core::{ApiClient, ClientConfig, Credential};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: storefront <command>

Commands:
  get <path>                 GET a resource
  delete <path>              DELETE a resource
  post <path> [json-body]    POST a JSON body
  put <path> [json-body]     PUT a JSON body
  patch <path> [json-body]   PATCH a JSON body
  login                      Store an access token (read from the terminal)
  logout                     Forget the stored access token
  status                     Show whether an access token is stored
  config                     Print the effective configuration

Environment:
  STOREFRONT_BASE_URL, STOREFRONT_REFRESH_PATH, STOREFRONT_STORAGE, RUST_LOG";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = ClientConfig::load().context("Failed to load configuration")?;

    if command == "config" {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = config
        .credential_store()
        .context("Failed to open credential store")?;
    let client = ApiClient::builder(config)
        .store(store)
        .on_reauth(|| eprintln!("Session expired. Run `storefront login` to sign in again."))
        .build()
        .context("Failed to create API client")?;

    match command {
        "login" => {
            let token = rpassword::prompt_password("Access token: ")?;
            let token = token.trim();
            if token.is_empty() {
                bail!("No access token entered");
            }
            client.login(Credential::new(token));
            info!("Access token stored");
            println!("Access token stored.");
        }
        "logout" => {
            client.logout();
            println!("Access token removed.");
        }
        "status" => {
            if client.credentials().is_present() {
                println!("Signed in ({})", client.base_url());
            } else {
                println!("Not signed in ({})", client.base_url());
            }
        }
        "get" | "delete" | "post" | "put" | "patch" => {
            let path = args
                .get(1)
                .with_context(|| format!("`{}` needs a path\n\n{}", command, USAGE))?;
            let body = args
                .get(2)
                .map(|raw| serde_json::from_str::<Value>(raw).context("Body is not valid JSON"))
                .transpose()?;
            send(&client, command, path, body).await?;
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    Ok(())
}

async fn send(client: &ApiClient, command: &str, path: &str, body: Option<Value>) -> Result<()> {
    let body = body.unwrap_or(Value::Null);
    let response = match command {
        "get" => client.get(path).await,
        "delete" => client.delete(path).await,
        "post" => client.post(path, &body).await,
        "put" => client.put(path, &body).await,
        _ => client.patch(path, &body).await,
    }
    .with_context(|| format!("{} {} failed", command.to_uppercase(), path))?;

    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;

    println!("{}", status);
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{}", text),
        Err(_) => {}
    }
    Ok(())
}
