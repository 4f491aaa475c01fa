//! lockstep command-line client.
//!
//! Runs the learner's program against the tests of the current attempt (or a
//! local test document) and keeps the attempt in step with the service.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use lockstep::batch::{NextOutcome, fetch_next};
use lockstep::core::migrate::{MigrateError, migrate_legacy};
use lockstep::core::parser::parse_challenge;
use lockstep::core::types::{AttemptState, Challenge, TestDescription, TestResult};
use lockstep::core::validation::check_output;
use lockstep::exit_codes;
use lockstep::guidance::{FIRST_RUN_HELP, spawn_guidance};
use lockstep::io::client::RemoteClient;
use lockstep::io::config::{CONFIG_FILE, DEFAULT_TARGET, ProjectConfig, load_config, write_config};
use lockstep::io::process::{HarnessError, Target, run_test};
use lockstep::io::store::{Store, default_db_path};
use lockstep::run::{Judge, render_halt, render_summary, report_outcome, run_tests};

const CHECK_TEST: &str = "(lockstep check)";
const PREVIEW_LINES: usize = 50;

#[derive(Parser)]
#[command(
    name = "lockstep",
    version,
    about = "Build a console program one server-curated test at a time"
)]
struct Cli {
    /// Local store path (default: $LOCKSTEP_DB or ~/.lockstep.sdb).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in through the browser and store the credential.
    Login,
    /// Show the user logged in to the configured server.
    Whoami,
    /// List challenges offered by the server.
    Challenges,
    /// Start an attempt on a challenge and write `.lockstep.toml`.
    Init { challenge: String },
    /// Check that the target program can be launched.
    Check {
        /// Program and arguments to try instead of the configured target.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run the tests, stopping at the first failure.
    Test {
        /// Run the tests in this document instead of the attempt's.
        #[arg(short, long)]
        tests: Option<PathBuf>,
        /// Only run tests with these names.
        names: Vec<String>,
    },
    /// Fetch the next batch of tests.
    Next,
    /// Describe the test currently in focus.
    Show,
    /// Print the attempt's state.
    Status,
    /// Import a challenge document into the store.
    Import { file: PathBuf },
    /// Delete a challenge and its attempts from the store.
    Delete { challenge: String },
    /// Rewrite a legacy challenge document in the current format.
    Migrate {
        /// Preview the result without writing anything.
        #[arg(long)]
        check: bool,
        file: PathBuf,
    },
}

fn main() {
    lockstep::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let db = cli.db.unwrap_or_else(default_db_path);
    match cli.command {
        Command::Login => cmd_login(&db),
        Command::Whoami => cmd_whoami(&db),
        Command::Challenges => cmd_challenges(),
        Command::Init { challenge } => cmd_init(&db, &challenge),
        Command::Check { args } => cmd_check(args),
        Command::Test { tests, names } => cmd_test(&db, tests, &names),
        Command::Next => cmd_next(&db),
        Command::Show => cmd_show(&db),
        Command::Status => cmd_status(&db),
        Command::Import { file } => cmd_import(&db, &file),
        Command::Delete { challenge } => cmd_delete(&db, &challenge),
        Command::Migrate { check, file } => cmd_migrate(&file, check),
    }
}

fn config() -> Result<ProjectConfig> {
    load_config(Path::new(CONFIG_FILE))
}

fn open_store(db: &Path) -> Result<Store> {
    Store::open(db).with_context(|| format!("open store {}", db.display()))
}

/// Client for the configured server, carrying the stored credential if any.
fn client(cfg: &ProjectConfig, store: &Store) -> Result<RemoteClient> {
    let server = cfg.server_url();
    let jwt = store.whoami(&server)?.map(|who| who.jwt);
    Ok(RemoteClient::new(&server, jwt)?)
}

fn read_challenge(path: &Path) -> Result<Challenge> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_challenge(&text).with_context(|| format!("parse {}", path.display()))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

fn cmd_login(db: &Path) -> Result<i32> {
    let cfg = config()?;
    let store = open_store(db)?;
    let server = cfg.server_url();
    if let Some(who) = store.whoami(&server)? {
        println!("Already logged in to {server} as {}.", who.username);
        return Ok(exit_codes::OK);
    }
    let client = RemoteClient::new(&server, None)?;
    let pre = client.pre_token().context("request login token")?;
    println!("Open this address in your browser to log in:");
    println!();
    println!("    {}", client.login_url(&pre));
    println!();
    println!("Waiting for the login to complete...");
    let grant = client.await_login(&pre).context("wait for login")?;
    let sid = store.ensure_server(&server)?;
    let uid = store.user_from_tokendata(sid, &grant.username, &grant.username)?;
    store.insert_token(uid, &grant.token)?;
    println!("Logged in to {server} as {}.", grant.username);
    Ok(exit_codes::OK)
}

fn cmd_whoami(db: &Path) -> Result<i32> {
    let cfg = config()?;
    let store = open_store(db)?;
    match store.whoami(&cfg.server_url())? {
        Some(who) => println!("logged in as {}", who.username),
        None => println!("not logged in."),
    }
    Ok(exit_codes::OK)
}

fn cmd_challenges() -> Result<i32> {
    let cfg = config()?;
    let client = RemoteClient::new(&cfg.server_url(), None)?;
    println!("Listing challenges from {}", client.base_url());
    println!();
    for c in client.list_challenges()? {
        println!(" {:16} : {}", c.name, c.title);
    }
    println!();
    Ok(exit_codes::OK)
}

fn cmd_init(db: &Path, challenge: &str) -> Result<i32> {
    let path = Path::new(CONFIG_FILE);
    let mut cfg = config()?;
    if !cfg.attempt.is_empty() {
        println!("Already initialized.");
        println!("Remove the `attempt` field from {CONFIG_FILE} to run `lockstep init` again.");
        return Ok(exit_codes::INVALID);
    }
    let store = open_store(db)?;
    let server = cfg.server_url();
    let who = store
        .whoami(&server)?
        .ok_or_else(|| anyhow!("please run `lockstep login` first"))?;
    let client = RemoteClient::new(&server, Some(who.jwt))?;
    let offered = client.list_challenges()?;
    let Some(summary) = offered.iter().find(|c| c.name == challenge) else {
        bail!("challenge {challenge:?} not found on {server}");
    };

    let sid = store.ensure_server(&server)?;
    let chid = store.ensure_challenge(sid, &summary.name, &summary.title)?;
    let code = client.create_attempt(challenge)?;
    store.create_attempt(&code, Some(who.uid), chid)?;
    cfg.attempt = code;
    write_config(path, &cfg)?;

    println!("Project initialized.");
    println!("Edit {CONFIG_FILE} to configure how to run your program.");
    println!("Then run `lockstep check` to make sure lockstep can run it.");
    Ok(exit_codes::OK)
}

fn cmd_check(args: Vec<String>) -> Result<i32> {
    let mut cfg = config()?;
    if !args.is_empty() {
        cfg.target.shell = args.iter().any(|a| a == "--shell");
        cfg.target.args = args.into_iter().filter(|a| a != "--shell").collect();
        cfg.validate()?;
    }
    let target = Target::from_config(&cfg);
    let first = &cfg.target.args[0];
    if !cfg.target.shell && first == DEFAULT_TARGET && !Path::new(first).exists() {
        println!("{FIRST_RUN_HELP}");
        return Ok(exit_codes::FAILED);
    }

    let test = TestDescription {
        name: CHECK_TEST.to_string(),
        head: "lockstep check".to_string(),
        body: [
            "lockstep needs to be able to run your program.",
            "Make sure it is marked as executable, and that by default",
            "it produces no output and exits with status 0.",
        ]
        .join("\n"),
        olines: Some(Vec::new()),
        ..TestDescription::default()
    };
    let lines = match run_test(&target, &test) {
        Ok(actual) => match check_output(&test, &actual) {
            TestResult::Fail { error, .. } => error.error_lines(),
            _ => {
                println!("lockstep ran {} successfully.", cfg.target.args.join(" "));
                println!("Run `lockstep next` to fetch the first test.");
                return Ok(exit_codes::OK);
            }
        },
        Err(HarnessError::Spawn(err)) => spawn_guidance(&err),
        Err(err @ (HarnessError::Timeout { .. } | HarnessError::OutputLimit { .. })) => {
            vec![err.to_string()]
        }
        Err(err) => return Err(err.into()),
    };
    println!("`lockstep check` failed.");
    println!();
    println!("{}", test.body);
    println!();
    print_lines(&lines);
    Ok(exit_codes::FAILED)
}

fn cmd_test(db: &Path, tests: Option<PathBuf>, names: &[String]) -> Result<i32> {
    let cfg = config()?;
    let target = Target::from_config(&cfg);

    let plan = tests.or_else(|| cfg.test_plan());
    let (store, challenge) = match &plan {
        Some(path) => (None, read_challenge(path)?),
        None if !cfg.attempt.is_empty() => {
            let store = open_store(db)?;
            let challenge = store
                .challenge_from_attempt(&cfg.attempt)
                .context("load attempt")?;
            (Some(store), challenge)
        }
        None => bail!(
            "no challenge selected; use `lockstep init`, `lockstep test --tests FILE`, \
             or set LOCKSTEP_TEST_PLAN"
        ),
    };
    if challenge.tests.is_empty() {
        bail!("no tests found; run `lockstep next` to fetch the first test");
    }

    let remote = match &store {
        Some(store) => Some(client(&cfg, store)?),
        None => None,
    };
    let judge = match (&store, &remote) {
        (Some(store), Some(remote)) => Judge::Online {
            code: &cfg.attempt,
            service: remote,
            store,
        },
        _ => Judge::Offline,
    };

    let report = run_tests(&challenge.tests, names, &target, &judge, |_| {
        print!(".");
        std::io::stdout().flush().context("flush stdout")
    })?;
    if report.selected == 0 {
        bail!("no tests named {}", names.join(", "));
    }
    println!();
    print_lines(&render_summary(&report, remote.is_some()));
    if let Some(halt) = &report.halt {
        println!();
        print_lines(&render_halt(halt));
    } else if let Some(path) = &plan {
        println!("All tests in {} passed.", path.display());
    }

    if let Some(step) = report_outcome(&report, &judge)? {
        debug!(state = %step.state, focus = ?step.focus_name, "attempt state after run");
    }
    Ok(if report.all_passed() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_next(db: &Path) -> Result<i32> {
    let cfg = config()?;
    let code = require_attempt_code(&cfg)?;
    let store = open_store(db)?;
    let remote = client(&cfg, &store)?;
    match fetch_next(&store, &remote, code)? {
        NextOutcome::AlreadyDone => println!("You have already completed the challenge!"),
        NextOutcome::Completed => println!("You have completed the challenge!"),
        NextOutcome::Blocked(state) => {
            println!("The attempt is in the {state} state.");
            println!("Make `lockstep test` pass again before asking for more work.");
        }
        NextOutcome::Known(tests) => {
            println!("You already have the next test.");
            println!();
            tests.iter().take(1).for_each(describe);
        }
        NextOutcome::Fetched(tests) => tests.iter().take(1).for_each(describe),
    }
    Ok(exit_codes::OK)
}

fn cmd_show(db: &Path) -> Result<i32> {
    let cfg = config()?;
    let code = require_attempt_code(&cfg)?;
    let store = open_store(db)?;
    let attempt = store.require_attempt(code)?;
    if attempt.state == AttemptState::Start {
        println!("You have not started the challenge yet.");
        println!("Use `lockstep check` to make sure your program runs.");
        println!("Use `lockstep next` to fetch the first test.");
        return Ok(exit_codes::OK);
    }
    let focused = match attempt.focus {
        Some(tid) => {
            let name = store.test_name(tid)?.unwrap_or_default();
            store.attempt_test(attempt.id, &name)?
        }
        None => store.next_batch(attempt.id)?.into_iter().next(),
    };
    match focused {
        Some(test) => describe(&test),
        None => {
            println!("All known tests have passed.");
            println!("Use `lockstep test` to check that they still pass.");
            println!("Use `lockstep next` to fetch the next test.");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_status(db: &Path) -> Result<i32> {
    let cfg = config()?;
    if cfg.attempt.is_empty() {
        println!("No attempt in progress.");
        println!("Use `lockstep init` to start a new attempt.");
        return Ok(exit_codes::OK);
    }
    let store = open_store(db)?;
    let status = store
        .status(&cfg.attempt)
        .with_context(|| format!("attempt {} not found in the store", cfg.attempt))?;
    println!("server: {}", status.server);
    println!("attempt: {}", cfg.attempt);
    println!("challenge: {}", status.challenge);
    println!(
        "state: {} {}",
        status.state,
        status.focus.unwrap_or_default()
    );
    Ok(exit_codes::OK)
}

fn cmd_import(db: &Path, file: &Path) -> Result<i32> {
    let challenge = read_challenge(file)?;
    let store = open_store(db)?;
    let sid = store.ensure_server(&challenge.server)?;
    store
        .import_challenge(sid, &challenge)
        .with_context(|| format!("import {}", file.display()))?;
    println!(
        "Challenge {:?} imported with {} tests.",
        challenge.name,
        challenge.tests.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_delete(db: &Path, challenge: &str) -> Result<i32> {
    let store = open_store(db)?;
    if !store.delete_challenge(challenge)? {
        bail!("challenge {challenge:?} does not exist in the store");
    }
    println!("Challenge {challenge:?} deleted.");
    Ok(exit_codes::OK)
}

fn cmd_migrate(file: &Path, check: bool) -> Result<i32> {
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let migration = match migrate_legacy(&text) {
        Ok(migration) => migration,
        Err(MigrateError::AlreadyCurrent) => {
            println!("{} is already in the current format.", file.display());
            return Ok(exit_codes::OK);
        }
        Err(err) => return Err(err).with_context(|| format!("migrate {}", file.display())),
    };

    if check {
        println!("Preview of {}:", file.display());
        println!();
        for line in migration.text.lines().take(PREVIEW_LINES) {
            println!("{line}");
        }
        let total = migration.text.lines().count();
        if total > PREVIEW_LINES {
            println!("... ({} more lines)", total - PREVIEW_LINES);
        }
    } else {
        let mut backup = file.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);
        fs::write(&backup, &text).with_context(|| format!("write {}", backup.display()))?;
        fs::write(file, &migration.text).with_context(|| format!("write {}", file.display()))?;
        println!("Migrated {} (backup in {}).", file.display(), backup.display());
    }
    println!();
    println!("Changes:");
    for change in &migration.changes {
        println!("  {change}");
    }
    Ok(exit_codes::OK)
}

fn require_attempt_code(cfg: &ProjectConfig) -> Result<&str> {
    if cfg.attempt.is_empty() {
        bail!("no attempt configured; run `lockstep init <challenge>` first");
    }
    Ok(&cfg.attempt)
}

fn describe(test: &TestDescription) {
    println!("#[{}]: {}", test.name, test.head);
    println!();
    if !test.body.is_empty() {
        println!("{}", test.body);
        println!();
    }
    println!("Use `lockstep test` to run the tests.");
}
