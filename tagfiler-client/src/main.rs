use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use std::process::exit;
use tagfiler_client::config;
use tagfiler_client::http::{self, Client};
use tagfiler_client::refresh::Refresher;
use tagfiler_client::session::Session;
use tagfiler_ql::{deep_link, ids_predicate, Decoder};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Tagfiler catalog query client", long_about = None)]
struct CliArgs {
    #[arg(
        short,
        long,
        help = "Config file location",
        default_value = config::DEFAULT_CONFIG_PATH
    )]
    config_file: String,

    #[arg(long, help = "Application log level", default_value_t = log::LevelFilter::Info)]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the query carried by a bookmark
    Decode { link: String },

    /// Print the bookmark of a view
    Link {
        #[arg(long, help = "Bookmark to start from")]
        link: Option<String>,
    },

    /// Fetch a page of matching subjects
    Preview {
        #[arg(long, help = "Bookmark to start from")]
        link: Option<String>,

        #[arg(long, help = "Page index, starting at 0")]
        page: Option<usize>,

        #[arg(long, help = "Refresh even if the request is unchanged")]
        force: bool,
    },

    /// List the distinct values of a tag over the matching subjects
    Range {
        tag: String,

        #[arg(long, help = "Bookmark to start from")]
        link: Option<String>,
    },

    /// Add tag values to the matching subjects
    SetTag {
        tag: String,

        #[arg(required = true)]
        values: Vec<String>,

        #[arg(long, help = "Bookmark to start from")]
        link: Option<String>,

        #[arg(long = "id", help = "Only change the subject with this id")]
        ids: Vec<String>,
    },

    /// Remove tag values, or the whole tag, from the matching subjects
    DeleteTag {
        tag: String,

        values: Vec<String>,

        #[arg(long, help = "Bookmark to start from")]
        link: Option<String>,

        #[arg(long = "id", help = "Only change the subject with this id")]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();
    env_logger::builder()
        .filter_level(cli_args.log_level)
        .init();

    let config = match config::load(&cli_args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            exit(1);
        }
    };

    let client = match Client::new(config.catalog.home(), &config.http) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            exit(1);
        }
    };

    let cancellation_token = CancellationToken::new();
    shutdown(cancellation_token.clone());

    tokio::select! {
        _ = cancellation_token.cancelled() => exit(130),
        result = run(cli_args.command, client, config) => {
            if let Err(e) = result {
                error!("{}", e);
                exit(1);
            }
        }
    }
}

fn shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
        info!("Interrupted, abandoning in-flight requests");
        token.cancel();
    });
}

async fn run(command: Command, client: Client, config: config::Config) -> Result<(), http::Error> {
    match command {
        Command::Decode { link } => {
            let registry = client.load_registry().await?;
            match Decoder::new(&registry).decode_deep_link(&link) {
                Some(query) => print(&query),
                None => info!("Link carries no query"),
            }
        }
        Command::Link { link } => {
            let session = Session::open(&client, config, link.as_deref()).await?;
            let url = session.store.bookmark_url(&session.encoder())?;
            println!("{}", deep_link(client.home(), &url));
        }
        Command::Preview { link, page, force } => {
            let mut session = Session::open(&client, config, link.as_deref()).await?;
            if let Some(page) = page {
                session.store.set_page(page);
            }

            let refresher = Refresher::new(client);
            if let Some(preview) = refresher
                .refresh(&session.store, &session.encoder(), force)
                .await?
            {
                print(&preview);
            }
        }
        Command::Range { tag, link } => {
            let session = Session::open(&client, config, link.as_deref()).await?;
            let range = query_state::range::probe(
                &client,
                &session.store,
                &session.encoder(),
                &tag,
                session.config().preview.select_limit,
            )
            .await?;
            print(&range);
        }
        Command::SetTag {
            tag,
            values,
            link,
            ids,
        } => {
            let session = Session::open(&client, config, link.as_deref()).await?;
            let predicates = target(&session, &ids)?;
            client.set_tag_values(&predicates, &tag, &values).await?;
            info!("Set {} on subjects matching {}", tag, predicates);
        }
        Command::DeleteTag {
            tag,
            values,
            link,
            ids,
        } => {
            let session = Session::open(&client, config, link.as_deref()).await?;
            let predicates = target(&session, &ids)?;
            client.delete_tag_values(&predicates, &tag, &values).await?;
            info!("Removed {} from subjects matching {}", tag, predicates);
        }
    }

    Ok(())
}

/// Predicate clause addressing the subjects a mutation applies to.
fn target(session: &Session, ids: &[String]) -> Result<String, http::Error> {
    match ids.is_empty() {
        true => Ok(session
            .encoder()
            .predicate_clause(session.store.filter())?),
        false => Ok(ids_predicate(ids)),
    }
}

fn print<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
