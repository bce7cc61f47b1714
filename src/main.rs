use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{ArgAction, Parser, Subcommand};
use log::debug;
use reembolso_client::normalize::parse_decimal;
use reembolso_client::payload::movement_payload_schema;
use reembolso_client::{
    apply_query, find_request, format_brl, render_detail, render_table, AppConfig, ListQuery,
    ReembolsoApp, SortKey, TypeFilter,
};

#[derive(Parser)]
#[command(name = "reembolso")]
#[command(about = "File and track expense reimbursements in the ERP")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "REEMBOLSO_CONFIG")]
    config: Option<PathBuf>,

    /// Serve everything from the in-process mock backend
    #[arg(long)]
    mock: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List your requests
    List {
        /// User code to list; defaults to the configured one
        #[arg(long)]
        user: Option<String>,

        /// todos, reembolso or adiantamento
        #[arg(long = "type", default_value = "todos")]
        request_type: TypeFilter,

        /// Matches request id or cost center
        #[arg(long)]
        search: Option<String>,

        /// id, date, total or status
        #[arg(long)]
        sort: Option<SortKey>,

        #[arg(long)]
        desc: bool,
    },

    /// Show one request in detail
    Show {
        id: String,

        /// User code whose requests are searched; defaults to the configured one
        #[arg(long)]
        user: Option<String>,
    },

    /// Show reference data
    Lookups {
        #[command(subcommand)]
        kind: LookupKind,
    },

    /// File a new reimbursement
    #[command(after_help = "\
Items are PROJECT:EXPENSE:PRICE[:TASK]. Leave EXPENSE empty to take the
project's first expense type, e.g. --item 1::45,90")]
    New {
        #[arg(long)]
        cost_center: String,

        #[arg(long = "item", required = true, value_name = "ITEM")]
        items: Vec<ItemArg>,

        /// Receipts to stage alongside the request
        #[arg(long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
    },

    /// Print the JSON schema of the movement body
    PayloadSchema,

    /// Forget requests cached on this machine
    ClearCache,
}

#[derive(Subcommand)]
enum LookupKind {
    CostCenters,
    Projects,
    Expenses {
        #[arg(long)]
        project: Option<u32>,
    },
    Tasks {
        #[arg(long)]
        project: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct ItemArg {
    project: u32,
    expense: Option<u32>,
    unit_price: f64,
    task: Option<u32>,
}

impl FromStr for ItemArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(format!("expected PROJECT:EXPENSE:PRICE[:TASK], got '{}'", s));
        }
        let id = |raw: &str, what: &str| -> Result<Option<u32>, String> {
            if raw.is_empty() {
                return Ok(None);
            }
            raw.parse()
                .map(Some)
                .map_err(|_| format!("invalid {} '{}'", what, raw))
        };

        Ok(ItemArg {
            project: id(parts[0], "project")?.ok_or("missing project")?,
            expense: id(parts[1], "expense")?,
            unit_price: parse_decimal(parts[2])
                .ok_or_else(|| format!("invalid price '{}'", parts[2]))?,
            task: match parts.get(3) {
                Some(raw) => id(raw, "task")?,
                None => None,
            },
        })
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.mock {
        config.use_mocks = true;
    }
    let app = ReembolsoApp::from_config(config)?;

    match cli.command {
        Commands::List {
            user,
            request_type,
            search,
            sort,
            desc,
        } => {
            let list = match user {
                Some(user) => app.load_requests_for(&user).await,
                None => app.load_requests().await,
            };
            if let Some(error) = &list.error {
                eprintln!("{}", error);
            }
            let query = ListQuery {
                filter: request_type,
                search,
                sort,
                descending: desc,
            };
            print!("{}", render_table(&apply_query(&list.items, &query)));
        }

        Commands::Show { id, user } => {
            let list = match user {
                Some(user) => app.load_requests_for(&user).await,
                None => app.load_requests().await,
            };
            if let Some(error) = &list.error {
                eprintln!("{}", error);
            }
            match find_request(&list.items, &id) {
                Some(item) => print!("{}", render_detail(item)),
                None => {
                    eprintln!("Solicitação {} não encontrada.", id);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::Lookups { kind } => match kind {
            LookupKind::CostCenters => {
                for cc in app.api().get_cost_centers().await {
                    println!("{}\t{}", cc.code, cc.name);
                }
            }
            LookupKind::Projects => {
                for p in app.api().get_projects().await {
                    println!("{}\t{}", p.id, p.name);
                }
            }
            LookupKind::Expenses { project } => {
                for e in app.api().get_expense_types(project).await {
                    let task = e.task_id.map(|t| t.to_string()).unwrap_or_default();
                    println!("{}\t{}\t{}", e.id, e.name, task);
                }
            }
            LookupKind::Tasks { project } => {
                for t in app.api().get_tasks(project).await {
                    println!("{}\t{}", t.id, t.name);
                }
            }
        },

        Commands::New {
            cost_center,
            items,
            attachments,
        } => {
            let mut form = app.new_form().await;
            form.select_cost_center(&cost_center)?;
            for (n, item) in items.iter().enumerate() {
                let idx = if n == 0 { 0 } else { form.add_item() };
                app.select_project(&mut form, idx, item.project).await?;
                if let Some(expense) = item.expense {
                    form.select_expense(idx, expense)?;
                }
                if let Some(task) = item.task {
                    form.set_task(idx, task)?;
                }
                form.set_unit_price(idx, item.unit_price)?;
            }
            let staged = form.stage_files(&attachments)?;
            debug!("Staged {} attachments", staged);

            match app.submit(&form).await {
                Ok(created) => {
                    println!(
                        "Solicitação {} enviada: {} ({})",
                        created.id,
                        format_brl(created.total),
                        created.status
                    );
                }
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Commands::PayloadSchema => {
            println!(
                "{}",
                serde_json::to_string_pretty(&movement_payload_schema())?
            );
        }

        Commands::ClearCache => {
            app.cache().clear();
            println!("Cache local limpo.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
