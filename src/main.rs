use clap::{Parser, Subcommand};
use spark_oauth2::{
    Configuration, ConsentHandle, ConsentPresenter, LocalServer, OAuth2Client, OAuthError,
    RequestOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "spark-oauth2",
    about = "Authorize against the Spark API via OAuth 2.0 and print resource responses."
)]
struct Cli {
    #[arg(long)]
    api_key: String,

    #[arg(long)]
    api_secret: String,

    /// Loopback redirect registered for this key; the code is captured there.
    #[arg(long, default_value = "http://localhost:8765/callback")]
    callback: String,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    auth_endpoint: Option<String>,

    #[arg(long)]
    auth_grant_url: Option<String>,

    #[arg(long)]
    api_version: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// GET a resource, e.g. `/listings`.
    Get {
        path: String,

        /// Query parameter as `key=value`; repeatable.
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Run consent and print the issued tokens.
    Authorize,
}

/// Opens the consent page in a browser and captures the redirect locally.
struct BrowserPresenter {
    server: LocalServer,
}

impl ConsentPresenter for BrowserPresenter {
    fn present(&self, consent_url: &str, handle: ConsentHandle) -> Result<(), OAuthError> {
        self.server.spawn(handle)?;
        eprintln!("Authorization URL:\n{consent_url}");
        if let Err(err) = webbrowser::open(consent_url) {
            eprintln!("Failed to open browser automatically: {err}");
        }
        Ok(())
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn configuration(cli: &Cli) -> Configuration {
    let mut config =
        Configuration::new(cli.api_key.clone(), cli.api_secret.clone()).with_callback(&cli.callback);
    if let Some(endpoint) = &cli.endpoint {
        config = config.with_endpoint(endpoint);
    }
    if let Some(auth_endpoint) = &cli.auth_endpoint {
        config = config.with_auth_endpoint(auth_endpoint);
    }
    if let Some(auth_grant_url) = &cli.auth_grant_url {
        config = config.with_auth_grant_url(auth_grant_url);
    }
    if let Some(api_version) = &cli.api_version {
        config = config.with_api_version(api_version);
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), OAuthError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let presenter = BrowserPresenter {
        server: LocalServer::new(&cli.callback)?,
    };
    let client = OAuth2Client::new(configuration(&cli), presenter);

    match cli.command {
        Command::Get { path, query } => {
            let options = query
                .into_iter()
                .fold(RequestOptions::new(), |options, (key, value)| {
                    options.with_query(key, value)
                });
            let response = client.get(&path, options).await?;
            println!("{}", response.body);
        }
        Command::Authorize => {
            client.request_consent().await?;
            let credential = client.credential();
            let output = serde_json::json!({
                "access_token": credential.access_token,
                "refresh_token": credential.refresh_token,
                "expires_in": credential.expires_in,
            });
            let output = serde_json::to_string_pretty(&output).map_err(|err| {
                OAuthError::InvalidResponse {
                    message: err.to_string(),
                    body: String::new(),
                }
            })?;
            println!("{output}");
        }
    }
    Ok(())
}
