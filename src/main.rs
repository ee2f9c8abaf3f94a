//! outreach-drafts: spreadsheet in, Outlook drafts out.
//!
//! Usage: `outreach-drafts --excel leads.xlsx --from-name "Sam" --from-email sam@example.com`
//! Reads `.env` from the working directory before parsing flags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use outreach_drafts_lib::augment::OpenAiClient;
use outreach_drafts_lib::config::{
    load_template, RunConfig, CLIENT_ID_ENV, DEFAULT_BODY, DEFAULT_SUBJECT, OPENAI_API_KEY_ENV,
};
use outreach_drafts_lib::contacts::load_contacts;
use outreach_drafts_lib::dispatch::{Dispatcher, Identity};
use outreach_drafts_lib::error::RunError;
use outreach_drafts_lib::microsoft_api::auth::{Authenticator, MicrosoftIdentity};
use outreach_drafts_lib::microsoft_api::mail::GraphMailClient;
use outreach_drafts_lib::microsoft_api::token_store::TokenStore;
use outreach_drafts_lib::microsoft_api::{token_path, RetryPolicy};
use outreach_drafts_lib::outcome::{DraftStatus, OutcomeLog};
use outreach_drafts_lib::pipeline::{Pipeline, RowReport, RunSummary, Templates};

#[derive(Parser, Debug)]
#[command(name = "outreach-drafts")]
#[command(version, about = "Create personalized Outlook drafts from a contact spreadsheet")]
struct Cli {
    /// Contact workbook (.xlsx, .xls, .ods)
    #[arg(long)]
    excel: PathBuf,

    #[arg(long, default_value = "Sheet1")]
    sheet: String,

    /// Sender display name
    #[arg(long)]
    from_name: String,

    /// Sender address, for the log only
    #[arg(long)]
    from_email: String,

    /// Azure app (public client) id
    #[arg(long, env = CLIENT_ID_ENV)]
    client_id: Option<String>,

    /// Pause before each draft request, in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    #[arg(long, default_value = "draft_log.csv")]
    log_csv: PathBuf,

    /// Append a generated line to each body (needs OPENAI_API_KEY)
    #[arg(long)]
    ai_personalize: bool,

    /// File holding the subject template
    #[arg(long)]
    subject_template: Option<PathBuf>,

    /// File holding the body template
    #[arg(long)]
    body_template: Option<PathBuf>,

    /// Credential cache location
    #[arg(long)]
    token_cache: Option<PathBuf>,

    /// Print the sign-in code without opening a browser
    #[arg(long)]
    no_browser: bool,
}

impl Cli {
    fn into_config(self) -> Result<(RunConfig, bool), RunError> {
        let templates = Templates {
            subject: load_template(self.subject_template.as_deref(), DEFAULT_SUBJECT)?,
            body: load_template(self.body_template.as_deref(), DEFAULT_BODY)?,
        };
        let config = RunConfig {
            excel: self.excel,
            sheet: self.sheet,
            from_name: self.from_name,
            from_email: self.from_email,
            client_id: self.client_id.unwrap_or_default(),
            delay: Duration::from_millis(self.delay_ms),
            max_attempts: self.max_attempts,
            log_csv: self.log_csv,
            ai_personalize: self.ai_personalize,
            openai_api_key: std::env::var(OPENAI_API_KEY_ENV).ok(),
            token_cache: self.token_cache.unwrap_or_else(token_path),
            templates,
        };
        config.validate()?;
        Ok((config, !self.no_browser))
    }
}

async fn run(config: RunConfig, open_browser: bool) -> Result<RunSummary, RunError> {
    let contacts = load_contacts(&config.excel, &config.sheet)?;

    let session = Authenticator::new(MicrosoftIdentity::new()?, TokenStore::new(&config.token_cache))
        .with_browser(open_browser)
        .acquire(&config.client_id)
        .await?;

    let dispatcher = Dispatcher::new(GraphMailClient::new()?)
        .with_pacing(config.delay)
        .with_retry_policy(RetryPolicy {
            max_attempts: config.max_attempts,
            ..RetryPolicy::default()
        });
    let sender = Identity {
        name: config.from_name.clone(),
        email: config.from_email.clone(),
    };
    let mut pipeline = Pipeline::new(
        config.templates.clone(),
        sender,
        dispatcher,
        OutcomeLog::new(&config.log_csv),
    );

    if config.ai_personalize {
        match OpenAiClient::from_api_key(config.augmentation_key()) {
            Some(client) => pipeline = pipeline.with_generator(Box::new(client)),
            None => log::warn!(
                "--ai-personalize set but {} is missing; drafting without augmentation",
                OPENAI_API_KEY_ENV
            ),
        }
    }

    let summary = pipeline.run(&session, &contacts, print_row).await;
    println!(
        "\nDone: {} drafted, {} failed ({} total). Log: {}",
        summary.succeeded,
        summary.failed,
        summary.total,
        pipeline.outcomes().path().display()
    );
    if summary.log_failures > 0 {
        eprintln!("Warning: {} rows could not be written to the log", summary.log_failures);
    }
    Ok(summary)
}

fn print_row(report: &RowReport) {
    let result = &report.result;
    match result.status {
        DraftStatus::Success => println!(
            "✓ [{}] {} <{}>",
            report.row, result.first_name, result.email
        ),
        DraftStatus::Error => println!(
            "✗ [{}] {} <{}>: {}",
            report.row,
            result.first_name,
            result.email,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.into_config() {
        Ok((config, open_browser)) => run(config, open_browser).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", e.recovery_suggestion());
            ExitCode::FAILURE
        }
    }
}
