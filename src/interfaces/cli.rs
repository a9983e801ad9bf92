use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::application::use_cases::bulk_session::BulkSession;
use crate::application::use_cases::execution_coordinator::{
    CompletionReport, ExecutionObserver, FinishedCase, ProgressView,
};
use crate::domain::error::{AppError, Result};
use crate::domain::execution::{ExecutionMode, ExecutionOptions};
use crate::domain::test_case::{CasePatch, DataMode};
use crate::infrastructure::bootstrap::{self, AppContext};
use crate::interfaces::render::{self, CaseTab};

#[derive(Parser, Debug)]
#[command(version, about = "Analyze, execute and report QA Pilot test-case spreadsheets")]
pub struct Cli {
    /// TOML configuration file. Defaults to `qapilot.toml` in the working directory.
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server root, overriding `base_url` from the configuration.
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a spreadsheet and show which cases are ready to run.
    Analyze(AnalyzeArgs),
    /// Analyze a spreadsheet, execute its cases and follow the job.
    Run(RunArgs),
    /// Show the current status of an execution.
    Status {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: String,
        /// Print the raw status as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Download the Word report of a finished execution.
    Report {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: String,
        /// Target directory. Defaults to `report_dir` from the configuration.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Analyze a spreadsheet and store its cases as a reusable suite.
    SaveSuite(SaveSuiteArgs),
    /// Edit one case of a spreadsheet and have the server re-validate it.
    Reanalyze(ReanalyzeArgs),
    /// Ask whether a single case is currently executing.
    CaseStatus {
        #[arg(value_name = "CASE_ID")]
        case_id: String,
    },
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(long, value_enum, default_value_t = DataModeArg::Simulated)]
    pub data_mode: DataModeArg,

    /// Which cases to list.
    #[arg(long, value_enum, default_value_t = CaseTab::All)]
    pub tab: CaseTab,

    /// Print the view as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Execute every case, including the ones with problems.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Execute only the case with this id.
    #[arg(long = "case", value_name = "CASE_ID", conflicts_with = "all")]
    pub case_id: Option<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Sequential)]
    pub mode: ModeArg,

    /// Run the browser with a visible window on the server.
    #[arg(long, default_value_t = false)]
    pub show_browser: bool,

    #[arg(long, value_enum, default_value_t = DataModeArg::Simulated)]
    pub data_mode: DataModeArg,

    /// Download the report into this directory once the job ends.
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    /// Print progress and the final view as JSON lines.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SaveSuiteArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(long)]
    pub name: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long, default_value_t = false)]
    pub include_invalid: bool,

    #[arg(long, value_enum, default_value_t = DataModeArg::Simulated)]
    pub data_mode: DataModeArg,
}

#[derive(Debug, Args)]
pub struct ReanalyzeArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(value_name = "CASE_ID")]
    pub case_id: String,

    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub user_story: Option<String>,
    #[arg(long)]
    pub objective: Option<String>,
    #[arg(long)]
    pub precondition: Option<String>,
    #[arg(long)]
    pub steps: Option<String>,
    #[arg(long)]
    pub test_data: Option<String>,
    #[arg(long)]
    pub expected: Option<String>,

    #[arg(long, value_enum, default_value_t = DataModeArg::Simulated)]
    pub data_mode: DataModeArg,
}

impl ReanalyzeArgs {
    fn patch(&self) -> CasePatch {
        CasePatch {
            nombre: self.name.clone(),
            historia_usuario: self.user_story.clone(),
            objetivo: self.objective.clone(),
            precondicion: self.precondition.clone(),
            pasos: self.steps.clone(),
            datos_prueba: self.test_data.clone(),
            resultado_esperado: self.expected.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Sequential,
    Parallel,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::Parallel => ExecutionMode::Parallel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DataModeArg {
    Simulated,
    User,
}

impl From<DataModeArg> for DataMode {
    fn from(mode: DataModeArg) -> Self {
        match mode {
            DataModeArg::Simulated => DataMode::Simulated,
            DataModeArg::User => DataMode::User,
        }
    }
}

/// Prints one line per poll while a job runs.
struct ConsoleObserver {
    json: bool,
    /// Finished cases already printed for the current job.
    printed: Mutex<usize>,
}

impl ConsoleObserver {
    fn new(json: bool) -> Self {
        Self {
            json,
            printed: Mutex::new(0),
        }
    }
}

impl ExecutionObserver for ConsoleObserver {
    fn on_submitted(&self, execution_id: &str, mode: ExecutionMode, cases: usize) {
        *self.printed.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        if !self.json {
            println!("Execution {} started: {} case(s), {} mode", execution_id, cases, mode);
        }
    }

    fn on_progress(&self, view: &ProgressView) {
        if self.json {
            print_json(view);
        } else {
            println!("{}", render::progress_line(view));
            // The server only appends to its result list.
            let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
            for result in view.results.iter().skip(*printed) {
                println!("{}", render::result_line(result));
            }
            *printed = (*printed).max(view.results.len());
        }
    }

    fn on_complete(&self, report: &CompletionReport) {
        if self.json {
            print_json(report);
        } else {
            println!(
                "Execution {} {}: {} passed, {} failed ({:.1}% success)",
                report.execution_id,
                report.status,
                report.succeeded,
                report.failed,
                report.success_rate
            );
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let context = bootstrap::setup(cli.config.as_deref(), cli.server.as_deref())?;

    match cli.command {
        Command::Analyze(args) => analyze(&context, args).await,
        Command::Run(args) => run(&context, args).await,
        Command::Status { execution_id, json } => status(&context, &execution_id, json).await,
        Command::Report { execution_id, out } => {
            let session = BulkSession::new(Arc::clone(&context.api), &context.config, None);
            let path = session
                .download_report_for(&execution_id, out.as_deref())
                .await?;
            println!("Report saved to {}", path.display());
            Ok(())
        }
        Command::SaveSuite(args) => save_suite(&context, args).await,
        Command::Reanalyze(args) => reanalyze(&context, args).await,
        Command::CaseStatus { case_id } => {
            let status = context.api.check_case_status(&case_id).await?;
            if status.is_running {
                println!(
                    "{} is running in {} ({}, {:.0}%)",
                    case_id,
                    status.execution_id.as_deref().unwrap_or("unknown execution"),
                    status.current_status.as_deref().unwrap_or("unknown"),
                    status.progress
                );
            } else {
                println!("{} is not running", case_id);
            }
            Ok(())
        }
    }
}

async fn load_session(
    context: &AppContext,
    file: &Path,
    data_mode: DataModeArg,
    observer: Option<Arc<dyn ExecutionObserver>>,
) -> Result<BulkSession> {
    let mut session = BulkSession::new(Arc::clone(&context.api), &context.config, observer);
    session
        .analyze_upload(Some(file), data_mode.into())
        .await?;
    Ok(session)
}

async fn analyze(context: &AppContext, args: AnalyzeArgs) -> Result<()> {
    let session = load_session(context, &args.file, args.data_mode, None).await?;
    let view = {
        let store = session.store().lock().unwrap_or_else(PoisonError::into_inner);
        render::render(&store, None, args.tab, false)
    };
    if args.json {
        print_json(&view);
    } else {
        if let Some(analysis) = session.analysis() {
            println!(
                "{} ({} analysis)",
                analysis.file_name,
                analysis.analysis_type.as_deref().unwrap_or("basic")
            );
        }
        print!("{}", render::to_text(&view));
    }
    Ok(())
}

async fn run(context: &AppContext, args: RunArgs) -> Result<()> {
    let observer: Arc<dyn ExecutionObserver> = Arc::new(ConsoleObserver::new(args.json));
    let session = load_session(context, &args.file, args.data_mode, Some(observer)).await?;
    let options = ExecutionOptions {
        show_browser: args.show_browser,
    };

    match (&args.case_id, args.all) {
        (Some(case_id), _) => session.execute_single(case_id, options).await?,
        (None, true) => session.execute_all(args.mode.into(), options).await?,
        (None, false) => session.execute_valid(args.mode.into(), options).await?,
    };
    let report = session.wait_for_execution().await?;

    let view = {
        let store = session.store().lock().unwrap_or_else(PoisonError::into_inner);
        render::render(
            &store,
            session.coordinator().progress().as_ref(),
            CaseTab::All,
            session.coordinator().report_ready().is_some(),
        )
    };
    if args.json {
        print_json(&view);
    } else {
        print!("{}", render::to_text(&view));
    }

    if let Some(dir) = &args.report_dir {
        let path = session.download_report(Some(dir)).await?;
        println!("Report saved to {}", path.display());
    }

    if report.failed > 0 {
        return Err(AppError::ApplicationError(format!(
            "{} of {} case(s) failed",
            report.failed, report.total
        )));
    }
    Ok(())
}

async fn status(context: &AppContext, execution_id: &str, json: bool) -> Result<()> {
    let snapshot = context.api.execution_status(execution_id).await?;
    if json {
        print_json(&snapshot);
        return Ok(());
    }
    let mode = snapshot.execution_mode.unwrap_or_default();
    println!(
        "{}",
        render::progress_line(&ProgressView::from_snapshot(execution_id, mode, &snapshot))
    );
    for result in &snapshot.results {
        println!("{}", render::result_line(&FinishedCase::from(result)));
    }
    if let Some(error) = &snapshot.error {
        println!("  error: {}", error);
    }
    Ok(())
}

async fn save_suite(context: &AppContext, args: SaveSuiteArgs) -> Result<()> {
    let session = load_session(context, &args.file, args.data_mode, None).await?;
    let saved = session
        .save_as_suite(&args.name, &args.description, args.include_invalid)
        .await?;
    println!("Suite '{}' saved with {} case(s)", args.name.trim(), saved);
    Ok(())
}

async fn reanalyze(context: &AppContext, args: ReanalyzeArgs) -> Result<()> {
    let patch = args.patch();
    if patch.is_empty() {
        return Err(AppError::ValidationError(
            "Pass at least one field to change, e.g. --steps.".to_string(),
        ));
    }
    let mut session = load_session(context, &args.file, args.data_mode, None).await?;
    let editor = session.editor_mut();
    editor.edit(&args.case_id)?;
    let assessment = editor.reanalyze(&patch).await?;
    editor.finish();

    println!(
        "{} is {}",
        args.case_id,
        if assessment.es_valido { "valid" } else { "still invalid" }
    );
    for problem in &assessment.problemas {
        println!("  problem: {}", problem);
    }
    for suggestion in &assessment.sugerencias {
        println!("  suggestion: {}", suggestion);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::error!(error = %err, "Failed to serialize output"),
    }
}
