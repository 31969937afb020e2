use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use social_auth::{
    AuthConfig, DatabaseConfig, Denylist, MemoryPrincipalStore, Principal, PrincipalLoader,
    TokenCodec, UserCreate, UserId, UserStore, create_app_state, create_router, unix_now,
};

#[derive(Parser)]
#[command(name = "social-auth")]
#[command(about = "Token authentication and authenticated real-time channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and the `/ws` STOMP endpoint
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// SurrealDB url for the user table (omit for an in-memory principal store)
        #[arg(long, env = "SURREALDB_URL")]
        db_url: Option<String>,
        /// JSON file with users to seed, an array of {user_id, username, ...}
        #[arg(long)]
        users: Option<PathBuf>,
        /// User ids to put on the revocation denylist at startup
        #[arg(long = "revoke")]
        revoked: Vec<i64>,
    },
    /// Issue a token for a user id
    IssueToken { subject: i64 },
    /// Verify a token and print its subject
    VerifyToken { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("social_auth=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = AuthConfig::load()?;

    match cli.command {
        Commands::Serve {
            bind,
            db_url,
            users,
            revoked,
        } => {
            let seed: Vec<UserCreate> = match users {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
                None => Vec::new(),
            };

            let store: Arc<dyn PrincipalLoader> = match db_url {
                Some(url) => {
                    let db_config = DatabaseConfig {
                        url,
                        ..Default::default()
                    };
                    info!("Using database url for user store: {}", db_config.url);
                    let db = social_auth::create_connection(db_config).await?;
                    social_auth::ensure_schema(&db).await?;

                    let store = UserStore::new(db);
                    for user in &seed {
                        if let Err(e) = store.create_user(user).await {
                            warn!(user_id = user.user_id, "Skipping seed user: {}", e);
                        }
                    }
                    Arc::new(store)
                }
                None => {
                    info!("Using in-memory principal store ({} users)", seed.len());
                    Arc::new(MemoryPrincipalStore::with_principals(
                        seed.into_iter().map(Principal::from),
                    ))
                }
            };

            let denylist = Arc::new(Denylist::new(store, config.revocation_ttl()));
            for id in revoked {
                denylist.revoke(UserId::new(id)).await;
            }

            let (state, mut app_rx) = create_app_state(&config, denylist)?;

            // No application handlers are mounted here; log what arrives.
            tokio::spawn(async move {
                while let Some(message) = app_rx.recv().await {
                    info!(
                        channel_id = %message.channel_id,
                        user_id = ?message.principal.as_ref().map(|p| p.id()),
                        path = %message.path,
                        bytes = message.frame.body().len(),
                        "Application message"
                    );
                }
            });

            let app = create_router(state);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!(
                policy = ?config.handshake_policy,
                "Server listening on http://{} (channels at ws://{}/ws)",
                bind,
                bind
            );
            axum::serve(listener, app).await?;
        }
        Commands::IssueToken { subject } => {
            let codec = TokenCodec::new(&config.jwt)?;
            let token = codec.issue(UserId::new(subject), unix_now())?;
            println!("{}", token);
        }
        Commands::VerifyToken { token } => {
            let codec = TokenCodec::new(&config.jwt)?;
            match codec.verify(&token, unix_now()) {
                Ok(subject) => println!("Valid token for user {}", subject),
                Err(e) => {
                    println!("Invalid token ({}): {}", e.kind(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
