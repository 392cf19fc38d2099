use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use tracelens::{conf::Conf, data::Storage, rbac::Role};

#[derive(Parser, Debug)]
struct Cli {
    /// Working directory, with config and data files.
    #[clap(short, long, default_value = "data")]
    dir: PathBuf,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Subcommand, Debug)]
enum Cmd {
    /// Serve the HTTP API.
    Server,
    /// Mint a session token for a user id, valid for `ttl` seconds.
    Jwt { uid: String, ttl: f64 },
    /// Create a project.
    Project { id: String, name: String },
    /// Create a user, optionally as the owner of an existing project.
    User {
        id: String,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        email: Option<String>,
        #[clap(long)]
        owner_of: Option<String>,
    },
    /// Create an API key for a project and print it, secret included.
    ApiKey {
        project_id: String,
        #[clap(long)]
        note: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    human_panic_setup();
    let cli = Cli::parse();
    set_current_dir(&cli.dir)?;
    let conf = tracelens::conf::global();
    tracelens::logging::init(conf.log_level)?;
    tracing::debug!(?cli, "Starting.");
    match &cli.cmd {
        Cmd::Server => tracelens::server::run().await,
        Cmd::Jwt { uid, ttl } => {
            let claims = tracelens::auth::Claims::new(
                uid,
                Duration::from_secs_f64(*ttl),
                &conf.jwt,
            )?;
            let encoded: String = claims.to_str(&conf.jwt)?;
            println!("{encoded}");
            Ok(())
        }
        Cmd::Project { id, name } => {
            storage(&conf)
                .await?
                .insert_project(id, name)
                .await
                .context(format!("Failed to create project {id:?}"))?;
            tracing::info!(id, name, "Created project.");
            Ok(())
        }
        Cmd::User {
            id,
            name,
            email,
            owner_of,
        } => {
            let storage = storage(&conf).await?;
            storage
                .insert_user(id, name.as_deref(), email.as_deref())
                .await
                .context(format!("Failed to create user {id:?}"))?;
            tracing::info!(id, "Created user.");
            if let Some(project_id) = owner_of {
                storage
                    .upsert_membership(project_id, id, Role::Owner)
                    .await
                    .context(format!(
                        "Failed to make {id:?} owner of {project_id:?}"
                    ))?;
                tracing::info!(id, project_id, "Added project owner.");
            }
            Ok(())
        }
        Cmd::ApiKey { project_id, note } => {
            let created = storage(&conf)
                .await?
                .create_api_key(project_id, note.as_deref())
                .await
                .context(format!("Failed to create key for {project_id:?}"))?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
    }
}

async fn storage(conf: &Conf) -> anyhow::Result<Storage> {
    Storage::connect(
        &conf.db_file,
        Duration::from_secs_f32(conf.sqlite_busy_timeout),
    )
    .await
}

fn set_current_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path)
        .context(format!("Failed to create directory path: {path:?}"))?;
    env::set_current_dir(path)
        .context(format!("Failed to set current directory to {path:?}"))?;
    Ok(())
}

fn human_panic_setup() {
    macro_rules! repo {
        () => {
            env!("CARGO_PKG_REPOSITORY")
        };
    }
    human_panic::setup_panic!(human_panic::Metadata::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
    .authors(env!("CARGO_PKG_AUTHORS"))
    .homepage(repo!())
    .support(concat!("- Submit an issue at ", repo!(), "/issues")));
}
