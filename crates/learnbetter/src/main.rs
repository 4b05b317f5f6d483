use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use learnbetter_core::acquisition::{PollTiming, QuizController, QuizRequest, QuizState};
use learnbetter_core::api::{
    ContentRecord, ContentUpload, HttpLearnClient, LearnApi, LearnClientConfig, ProcessingStatusKind,
};
use learnbetter_core::cache::{ContentCache, cache_key};
use learnbetter_core::clock::{Clock, SystemClock};
use learnbetter_core::config::{LearnConfig, ProcessingConfig, ProcessingConfigPatch, load_config};
use learnbetter_core::processing::{ProcessingMonitor, ProcessingState, Submission, submit_content};
use learnbetter_core::question::{ContentId, Question, QuestionBody, QuizId, letter_index, option_letter};
use learnbetter_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_layout, resolve_paths,
};
use learnbetter_core::session::{AdvanceOutcome, QuizReport};
use learnbetter_core::storage::{ClientState, SqliteStore};
use learnbetter_core::validate::{MatchPair, UserAnswer, format_correct_answer_for_display};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "learnbetter",
    version,
    about = "Upload study material, follow its processing and take the generated quizzes"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    home: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    home: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            home: cli.home.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Upload a file, web link or text and start processing it")]
    Upload(UploadArgs),
    #[command(about = "Trigger processing for uploaded content and wait for it")]
    Process(ProcessArgs),
    #[command(about = "Show the processing status of uploaded content")]
    Status(StatusArgs),
    #[command(about = "Take the quiz generated for a piece of content")]
    Quiz(QuizArgs),
    Content(ContentArgs),
    Concepts(ConceptsArgs),
    Cache(CacheArgs),
    Config(ConfigArgs),
    Auth(AuthArgs),
    #[command(about = "Show resolved runtime paths")]
    Paths,
}

#[derive(Debug, Args)]
struct UploadArgs {
    #[arg(long, value_name = "PATH", conflicts_with_all = ["url", "text"])]
    file: Option<PathBuf>,
    #[arg(long, value_name = "NAME", requires = "file", help = "File category sent with the upload")]
    category: Option<String>,
    #[arg(long, value_name = "URL", conflicts_with = "text")]
    url: Option<String>,
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,
    #[arg(long, help = "Let the backend use its own model and prompts")]
    server_defaults: bool,
    #[arg(long, help = "Return after processing has been triggered")]
    no_wait: bool,
}

#[derive(Debug, Args)]
struct ProcessArgs {
    content_id: ContentId,
    #[arg(long, value_name = "URL", help = "Source URL, used to cache the results")]
    url: Option<String>,
    #[arg(long, help = "Re-trigger with the backend's own settings")]
    retry: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    content_id: ContentId,
    #[arg(long, value_name = "URL", help = "Source URL, used to cache the results")]
    url: Option<String>,
    #[arg(long, help = "Keep polling until processing completes or fails")]
    wait: bool,
}

#[derive(Debug, Args)]
struct QuizArgs {
    #[arg(long, value_name = "ID", required_unless_present = "quiz_id", conflicts_with = "quiz_id")]
    content_id: Option<ContentId>,
    #[arg(long, value_name = "ID")]
    quiz_id: Option<QuizId>,
    #[arg(long, value_name = "N", default_value_t = 0, help = "Question index to resume from")]
    index: usize,
    #[arg(long, value_name = "URL", help = "Source URL, enables the local quiz cache")]
    url: Option<String>,
}

#[derive(Debug, Args)]
struct ContentArgs {
    #[command(subcommand)]
    command: ContentSubcommand,
}

#[derive(Debug, Subcommand)]
enum ContentSubcommand {
    #[command(about = "List uploaded content")]
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    #[command(about = "Show one uploaded item")]
    Show { content_id: ContentId },
    #[command(about = "Delete uploaded content on the backend")]
    Delete { content_id: ContentId },
}

#[derive(Debug, Args)]
struct ConceptsArgs {
    #[command(subcommand)]
    command: ConceptsSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConceptsSubcommand {
    Delete {
        content_id: ContentId,
        concept_id: i64,
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    Show {
        url: String,
        #[arg(long, help = "Look up the entry stored under the saved processing settings")]
        with_config: bool,
    },
    Purge,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    Show,
    #[command(name = "set-processing")]
    SetProcessing(SetProcessingArgs),
}

#[derive(Debug, Args)]
struct SetProcessingArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_name = "KEY")]
    api_key: Option<String>,
    #[arg(long, value_name = "PROMPT")]
    summary_prompt: Option<String>,
    #[arg(long, value_name = "PROMPT")]
    key_concepts_prompt: Option<String>,
    #[arg(long, help = "Forget saved settings and fall back to the defaults")]
    reset: bool,
}

#[derive(Debug, Args)]
struct AuthArgs {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    #[command(name = "set-token")]
    SetToken { token: String },
    Clear,
}

/// Everything a command needs to talk to the backend.
struct Workspace {
    paths: ResolvedPaths,
    config: LearnConfig,
    store: SqliteStore,
}

impl Workspace {
    fn open(runtime: &RuntimeOptions) -> Result<Self> {
        let paths = resolve_runtime_paths(runtime)?;
        ensure_layout(&paths)?;
        let config = load_config(&paths.config_path)?;
        let store = SqliteStore::open(&paths.db_path)?;
        debug!(db_path = %normalize_path(&paths.db_path), "workspace opened");
        Ok(Self {
            paths,
            config,
            store,
        })
    }

    fn state(&self) -> ClientState<&SqliteStore> {
        ClientState::new(&self.store)
    }

    fn client(&self) -> Result<HttpLearnClient<&SqliteStore>> {
        HttpLearnClient::new(LearnClientConfig::from_config(&self.config), self.state())
    }

    fn cache(&self) -> ContentCache<&SqliteStore> {
        ContentCache::new(&self.store, self.config.cache_ttl())
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    let result = match cli.command {
        Some(Commands::Upload(args)) => run_upload(&runtime, args),
        Some(Commands::Process(args)) => run_process(&runtime, args),
        Some(Commands::Status(args)) => run_status(&runtime, args),
        Some(Commands::Quiz(args)) => run_quiz(&runtime, args),
        Some(Commands::Content(ContentArgs { command })) => match command {
            ContentSubcommand::List { page, limit } => run_content_list(&runtime, page, limit),
            ContentSubcommand::Show { content_id } => run_content_show(&runtime, content_id),
            ContentSubcommand::Delete { content_id } => run_content_delete(&runtime, content_id),
        },
        Some(Commands::Concepts(ConceptsArgs { command })) => match command {
            ConceptsSubcommand::Delete {
                content_id,
                concept_id,
                url,
            } => run_concepts_delete(&runtime, content_id, concept_id, url),
        },
        Some(Commands::Cache(CacheArgs { command })) => match command {
            CacheSubcommand::Show { url, with_config } => {
                run_cache_show(&runtime, &url, with_config)
            }
            CacheSubcommand::Purge => run_cache_purge(&runtime),
        },
        Some(Commands::Config(ConfigArgs { command })) => match command {
            ConfigSubcommand::Show => run_config_show(&runtime),
            ConfigSubcommand::SetProcessing(args) => run_config_set_processing(&runtime, args),
        },
        Some(Commands::Auth(AuthArgs { command })) => match command {
            AuthSubcommand::SetToken { token } => run_auth_set_token(&runtime, &token),
            AuthSubcommand::Clear => run_auth_clear(&runtime),
        },
        Some(Commands::Paths) => run_paths(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    };

    report_expired_session(&runtime);
    result
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("LEARNBETTER_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_upload(runtime: &RuntimeOptions, args: UploadArgs) -> Result<()> {
    let upload = match (args.file, args.url, args.text) {
        (Some(path), None, None) => ContentUpload::File {
            path,
            category: args.category,
        },
        (None, Some(url), None) => ContentUpload::Weblink { url },
        (None, None, Some(text)) => ContentUpload::Text { text },
        _ => bail!("exactly one of --file, --url or --text is required"),
    };

    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let cache = workspace.cache();
    let config = if args.server_defaults {
        None
    } else {
        api.state().processing_config()?
    };

    println!("upload");
    println!("kind: {}", upload.kind());
    let source_url = upload.source_url().map(ToString::to_string);
    match submit_content(&mut api, &cache, &upload, config.as_ref())? {
        Submission::Cached(entry) => {
            println!("cached: yes");
            println!("title: {}", entry.title.as_deref().unwrap_or("<none>"));
            println!("summary: {}", entry.summary.as_deref().unwrap_or("<none>"));
            for concept in entry.key_concepts.unwrap_or_default() {
                print_concept(concept.id, &concept.concept_name, &concept.description);
            }
        }
        Submission::Started(content_id) => {
            println!("cached: no");
            println!("content_id: {content_id}");
            if !args.no_wait {
                let mut monitor = ProcessingMonitor::new(
                    content_id,
                    source_url,
                    workspace.config.processing_poll_interval(),
                );
                let clock = SystemClock;
                monitor.start(clock.now());
                monitor.wait(&mut api, &cache, &clock);
                print_monitor(&monitor)?;
            }
        }
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_process(runtime: &RuntimeOptions, args: ProcessArgs) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let cache = workspace.cache();
    let clock = SystemClock;

    let mut monitor = ProcessingMonitor::new(
        args.content_id,
        args.url,
        workspace.config.processing_poll_interval(),
    );
    if args.retry {
        monitor.retry(&mut api, clock.now());
    } else {
        let config = api.state().processing_config()?;
        api.trigger_processing(args.content_id, config.as_ref())?;
        monitor.start(clock.now());
    }
    monitor.wait(&mut api, &cache, &clock);

    println!("process");
    println!("content_id: {}", args.content_id);
    print_monitor(&monitor)?;
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions, args: StatusArgs) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let cache = workspace.cache();

    let mut monitor = ProcessingMonitor::new(
        args.content_id,
        args.url,
        workspace.config.processing_poll_interval(),
    );
    if args.wait {
        let clock = SystemClock;
        monitor.start(clock.now());
        monitor.wait(&mut api, &cache, &clock);
    } else {
        let status = api.get_processing_status(args.content_id)?;
        if !matches!(
            status.processing_status,
            ProcessingStatusKind::Completed | ProcessingStatusKind::Failed
        ) {
            println!("content_id: {}", args.content_id);
            println!("status: {}", status.processing_status.as_str());
            print_diagnostics(runtime, &workspace.paths);
            return Ok(());
        }
        monitor.apply_status(&cache, status);
    }

    println!("content_id: {}", args.content_id);
    print_monitor(&monitor)?;
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_quiz(runtime: &RuntimeOptions, args: QuizArgs) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let cache = workspace.cache();
    let clock = SystemClock;

    let mut request = match (args.content_id, args.quiz_id) {
        (Some(content_id), None) => QuizRequest::for_content(content_id),
        (None, Some(quiz_id)) => QuizRequest::for_quiz(quiz_id, args.index),
        _ => bail!("exactly one of --content-id or --quiz-id is required"),
    };
    if let Some(url) = args.url {
        request = request.with_source(url, api.state().processing_config()?);
    }

    let mut controller = QuizController::new(request, PollTiming::from_config(&workspace.config));
    controller.load(&mut api, &cache, clock.now());
    if let QuizState::Error(message) = controller.state() {
        bail!("{message}");
    }

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        controller.tick(&mut api, &cache, clock.now());
        if *controller.state() == QuizState::Completed {
            break;
        }
        if controller.quiz().is_none() {
            bail!("quiz is not loaded");
        }
        let index = controller.session().current_index();

        // An empty first batch falls through to advance(), which waits or finishes.
        if let Some(question) = controller.current_question().cloned()
            && controller.session().answer_at(index).is_none()
        {
            print_question(&question, index, controller.question_count(), controller.loading_more());
            let Some(line) = prompt(&mut input)? else {
                controller.teardown();
                println!("quiz abandoned");
                return Ok(());
            };
            if line.eq_ignore_ascii_case("q") {
                controller.teardown();
                println!("quiz abandoned");
                return Ok(());
            }
            let Some(answer) = parse_answer(&question, &line) else {
                println!("could not read that answer, try again");
                continue;
            };
            match controller.submit_answer(answer, clock.unix_millis()) {
                Some(true) => println!("correct"),
                Some(false) => {
                    println!("incorrect");
                    println!(
                        "correct answer: {}",
                        format_correct_answer_for_display(Some(&question))
                    );
                    if let Some(hint) = question.hint.as_deref() {
                        println!("hint: {hint}");
                    }
                }
                None => continue,
            }
        }

        match controller.advance() {
            AdvanceOutcome::Moved(_) | AdvanceOutcome::FeedbackPending => {}
            AdvanceOutcome::AwaitingQuestions => {
                println!("generating more questions...");
                let before = controller.question_count();
                let after = controller.wait_for_more(&mut api, &cache, &clock);
                if after > before {
                    println!("{} new questions", after - before);
                }
            }
            AdvanceOutcome::Finished => break,
        }
    }

    if let Some(report) = controller.report() {
        print_report(&report);
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_content_list(runtime: &RuntimeOptions, page: Option<u32>, limit: Option<u32>) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let records = api.list_content(page, limit)?;

    println!("content list");
    println!("items: {}", records.len());
    for record in &records {
        print_content_record(record);
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_content_show(runtime: &RuntimeOptions, content_id: ContentId) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let record = api.get_content(content_id)?;

    println!("content show");
    println!("id: {}", record.id);
    println!("title: {}", record.title.as_deref().unwrap_or("<untitled>"));
    println!("type: {}", record.content_type.as_deref().unwrap_or("-"));
    println!("status: {}", record.processing_status.as_deref().unwrap_or("-"));
    if let Some(url) = record.source_url.as_deref() {
        println!("source_url: {url}");
    }
    if let Some(created_at) = record.created_at.as_deref() {
        println!("created_at: {created_at}");
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_content_delete(runtime: &RuntimeOptions, content_id: ContentId) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    api.delete_content(content_id)?;

    println!("content delete");
    println!("content_id: {content_id}");
    println!("deleted: {}", format_flag(true));
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_concepts_delete(
    runtime: &RuntimeOptions,
    content_id: ContentId,
    concept_id: i64,
    url: Option<String>,
) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let mut api = workspace.client()?;
    let cache = workspace.cache();

    let status = api.get_processing_status(content_id)?;
    if status.processing_status != ProcessingStatusKind::Completed {
        bail!(
            "content {content_id} is still {}; key concepts are not available yet",
            status.processing_status.as_str()
        );
    }
    let mut monitor = ProcessingMonitor::new(
        content_id,
        url,
        workspace.config.processing_poll_interval(),
    );
    monitor.apply_status(&cache, status);
    let deleted = monitor.delete_key_concept(&mut api, &cache, concept_id);

    println!("concepts delete");
    println!("content_id: {content_id}");
    println!("concept_id: {concept_id}");
    println!("deleted: {}", format_flag(deleted));
    if let Some(error) = monitor.error() {
        println!("error: {error}");
    }
    for concept in monitor.key_concepts() {
        print_concept(concept.id, &concept.concept_name, &concept.description);
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_cache_show(runtime: &RuntimeOptions, url: &str, with_config: bool) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let config = if with_config {
        workspace.state().processing_config()?
    } else {
        None
    };
    let cache = workspace.cache();

    println!("cache show");
    println!("key: {}", cache_key(url, config.as_ref()));
    match cache.get(url, config.as_ref()) {
        Some(entry) => {
            let rendered =
                serde_json::to_string_pretty(&entry).context("failed to render cache entry")?;
            println!("{rendered}");
        }
        None => println!("entry: <none>"),
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_cache_purge(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let removed = workspace.cache().purge_expired(SystemClock.unix_millis());

    println!("cache purge");
    println!("removed_entries: {removed}");
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_config_show(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let config = &workspace.config;

    println!("config");
    println!("config_path: {}", normalize_path(&workspace.paths.config_path));
    println!("api.base_url: {}", config.api_base_url());
    println!("api.timeout_ms: {}", config.timeout_ms());
    println!("api.max_retries: {}", config.max_retries());
    println!("api.retry_delay_ms: {}", config.retry_delay_ms());
    println!("quiz.target_questions: {}", config.target_questions());
    println!("quiz.poll_interval_ms: {}", config.quiz_poll_interval().as_millis());
    println!("quiz.poll_timeout_ms: {}", config.quiz_poll_timeout().as_millis());
    println!(
        "processing.poll_interval_ms: {}",
        config.processing_poll_interval().as_millis()
    );
    println!("cache.ttl_hours: {}", config.cache_ttl().as_secs() / 3_600);

    match workspace.state().processing_config()? {
        Some(processing) => print_processing_config("saved", &processing),
        None => print_processing_config("default", &ProcessingConfig::embedded()?),
    }
    print_diagnostics(runtime, &workspace.paths);
    Ok(())
}

fn run_config_set_processing(runtime: &RuntimeOptions, args: SetProcessingArgs) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    let state = workspace.state();

    if args.reset {
        state.clear_processing_config()?;
        println!("processing settings reset to defaults");
        return Ok(());
    }

    let base = match state.processing_config()? {
        Some(saved) => saved,
        None => ProcessingConfig::embedded()?,
    };
    let updated = base.overlay(ProcessingConfigPatch {
        model: args.model,
        api_key: args.api_key,
        summary_prompt: args.summary_prompt,
        key_concepts_prompt: args.key_concepts_prompt,
    });
    state.save_processing_config(&updated)?;
    print_processing_config("saved", &updated);
    Ok(())
}

fn run_auth_set_token(runtime: &RuntimeOptions, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("token must not be empty");
    }
    let workspace = Workspace::open(runtime)?;
    let state = workspace.state();
    state.set_token(token)?;
    state.take_token_expired()?;
    println!("token stored");
    Ok(())
}

fn run_auth_clear(runtime: &RuntimeOptions) -> Result<()> {
    let workspace = Workspace::open(runtime)?;
    workspace.state().clear_auth()?;
    println!("signed out");
    Ok(())
}

fn run_paths(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    println!("home_dir: {}", normalize_path(&paths.home_dir));
    println!("home_exists: {}", format_flag(paths.home_dir.exists()));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(paths.db_path.exists()));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("config_exists: {}", format_flag(paths.config_path.exists()));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn report_expired_session(runtime: &RuntimeOptions) {
    let Ok(paths) = resolve_runtime_paths(runtime) else {
        return;
    };
    if !paths.db_path.exists() {
        return;
    }
    let Ok(store) = SqliteStore::open(&paths.db_path) else {
        return;
    };
    if let Ok(true) = ClientState::new(store).take_token_expired() {
        eprintln!("session expired; store a new token with `learnbetter auth set-token`");
    }
}

fn print_monitor(monitor: &ProcessingMonitor) -> Result<()> {
    match monitor.state() {
        ProcessingState::Completed => {
            println!("status: completed");
            println!("title: {}", monitor.title().unwrap_or("<none>"));
            println!("summary: {}", monitor.summary().unwrap_or("<none>"));
            println!("key_concepts: {}", monitor.key_concepts().len());
            for concept in monitor.key_concepts() {
                print_concept(concept.id, &concept.concept_name, &concept.description);
            }
            Ok(())
        }
        ProcessingState::Failed(message) => bail!("processing failed: {message}"),
        ProcessingState::Processing => {
            println!("status: processing ({}%)", monitor.progress().percent());
            Ok(())
        }
    }
}

fn print_content_record(record: &ContentRecord) {
    let title = record.title.as_deref().unwrap_or("<untitled>");
    let status = record.processing_status.as_deref().unwrap_or("-");
    match record.content_type.as_deref() {
        Some(kind) => println!("  - [{}] {title} ({kind}, {status})", record.id),
        None => println!("  - [{}] {title} ({status})", record.id),
    }
}

fn print_concept(id: Option<i64>, name: &str, description: &str) {
    let id = id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
    if description.is_empty() {
        println!("  - [{id}] {name}");
    } else {
        println!("  - [{id}] {name}: {description}");
    }
}

fn print_processing_config(label: &str, config: &ProcessingConfig) {
    println!("processing ({label})");
    println!("  model: {}", config.model);
    println!(
        "  api_key: {}",
        if config.api_key.is_empty() { "<unset>" } else { "<set>" }
    );
    println!("  summary_prompt: {}", config.summary_prompt);
    println!("  key_concepts_prompt: {}", config.key_concepts_prompt);
}

fn print_question(question: &Question, index: usize, count: usize, loading_more: bool) {
    let total = if loading_more {
        format!("{count}+")
    } else {
        count.to_string()
    };
    println!();
    println!("[{}/{total}] ({}) {}", index + 1, question.type_label(), question.title);
    if let Some(description) = question.description.as_deref() {
        println!("{description}");
    }
    match &question.body {
        QuestionBody::TrueFalse => println!("  answer with true or false"),
        QuestionBody::FillBlank { text, options } => {
            if let Some(text) = text {
                println!("  {text}");
            }
            print_lettered(options);
        }
        QuestionBody::Objective { options } => print_lettered(options),
        QuestionBody::OddOneOut { items } => print_lettered(items),
        QuestionBody::MatchFollowing { left, right } => {
            for (position, term) in left.iter().enumerate() {
                println!("  {}. {term}", position + 1);
            }
            print_lettered(right);
            println!("  answer as pairs, e.g. 1=B, 2=A");
        }
        QuestionBody::Unknown { raw_type } => println!("  ({raw_type}) free-form answer"),
    }
}

fn print_lettered(options: &[String]) {
    for (position, option) in options.iter().enumerate() {
        if let Some(letter) = option_letter(position) {
            println!("  {letter}) {option}");
        }
    }
}

fn prompt(input: &mut impl BufRead) -> Result<Option<String>> {
    print!("> ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    if input.read_line(&mut line).context("failed to read answer")? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn parse_answer(question: &Question, line: &str) -> Option<UserAnswer> {
    if line.is_empty() {
        return None;
    }
    match &question.body {
        QuestionBody::Objective { options } | QuestionBody::FillBlank { options, .. } => {
            let index = letter_index(line).filter(|index| *index < options.len())?;
            option_letter(index).map(|letter| UserAnswer::choice(letter.to_string()))
        }
        QuestionBody::TrueFalse => match line.to_ascii_lowercase().as_str() {
            "t" | "true" => Some(UserAnswer::choice("true")),
            "f" | "false" => Some(UserAnswer::choice("false")),
            _ => None,
        },
        QuestionBody::OddOneOut { items } => letter_index(line)
            .and_then(|index| items.get(index))
            .map(|item| UserAnswer::choice(item.clone()))
            .or_else(|| Some(UserAnswer::choice(line))),
        QuestionBody::MatchFollowing { left, right } => {
            let mut pairs = Vec::new();
            for part in line.split([',', ';']) {
                let (term, matched) = part.split_once('=')?;
                let term = term.trim().parse::<usize>().ok()?.checked_sub(1)?;
                let matched = letter_index(matched)?;
                pairs.push(MatchPair::new(left.get(term)?, right.get(matched)?));
            }
            Some(UserAnswer::Pairs(pairs))
        }
        QuestionBody::Unknown { .. } => Some(UserAnswer::choice(line)),
    }
}

fn print_report(report: &QuizReport) {
    println!();
    println!("quiz results");
    println!("correct: {}/{}", report.correct, report.total);
    println!("score: {}%", report.percentage);
    println!("{}", report.band.message());
    for (label, tally) in &report.breakdown {
        println!("  {label}: {}/{}", tally.correct, tally.total);
    }
    let missed = report.review.iter().filter(|item| !item.is_correct).count();
    if missed > 0 {
        println!("review");
        for item in report.review.iter().filter(|item| !item.is_correct) {
            println!("  {}. {}", item.position, item.title);
            println!("     your answer: {}", item.user_answer);
            if let Some(correct) = item.correct_answer.as_deref() {
                println!("     correct answer: {correct}");
            }
            if let Some(hint) = item.hint.as_deref() {
                println!("     hint: {hint}");
            }
            if !item.linked_concepts.is_empty() {
                println!("     concepts: {}", item.linked_concepts.join(", "));
            }
        }
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        home: runtime.home.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let home_env = initial.home_dir.join(".env");
    if home_env.exists() {
        let _ = dotenvy::from_path_override(&home_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
