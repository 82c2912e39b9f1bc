//! GameScript CLI - Command-line interface for GameScript data directories
//!
//! Provides subcommands for listing, inspecting, validating and playing
//! compiled dialogue snapshots.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gamescript::runtime::{
    self, storage, ActorSpec, CompletionHandle, ConversationListener, ConversationRef,
    ConversationSpec, ConversationState, Database, DefaultTaskOwner, EdgeSpec, Locale, Manifest,
    NodeRef, NodeRegistry, NodeSpec, Runner, RunnerSettings, SnapshotBuilder,
};

#[derive(Parser)]
#[command(name = "gamescript")]
#[command(about = "Inspect and play compiled GameScript dialogue", long_about = None)]
struct Cli {
    /// Data directory containing manifest.json
    #[arg(short, long, default_value = "GameScript")]
    data: PathBuf,

    /// Locale code to load (default: the manifest's primary locale)
    #[arg(short, long)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the locales in the manifest
    Locales,

    /// List conversations in the loaded snapshot
    Conversations,

    /// Show the nodes and edges of one conversation
    Inspect {
        /// Conversation id
        id: i32,
    },

    /// Check node flags against registered callbacks and snapshot hashes
    Validate,

    /// Run a conversation on the console
    Play {
        /// Conversation id
        id: i32,

        /// Always take the first choice instead of prompting
        #[arg(long)]
        auto: bool,

        /// Stop after entering this many nodes
        #[arg(long, default_value = "1000")]
        max_nodes: usize,
    },

    /// Write a sample data directory
    Scaffold {
        /// Target directory
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Locales => {
            let manifest = Manifest::load_from_dir(&cli.data)?;
            println!("Manifest version {}", manifest.version());
            if let Some(at) = manifest.exported_at() {
                println!("Exported at {}", at.to_rfc3339());
            }
            for (i, locale) in manifest.locales().iter().enumerate() {
                let marker = if i == manifest.primary_locale_index() { "*" } else { " " };
                println!(
                    "{} {:>4}  {:<12} {:<20} {}",
                    marker, locale.id, locale.name, locale.localized_name, locale.hash
                );
            }
        }

        Commands::Conversations => {
            let database = open_database(&cli.data, cli.locale.as_deref())?;
            println!(
                "{} conversations in locale {}",
                database.conversation_count(),
                database.locale_name()
            );
            for conversation in database.conversations() {
                println!(
                    "{:>6}  {:<32} {} nodes, {} edges",
                    conversation.id(),
                    conversation.name(),
                    conversation.node_count(),
                    conversation.edge_count()
                );
            }
        }

        Commands::Inspect { id } => {
            let database = open_database(&cli.data, cli.locale.as_deref())?;
            let conversation = database.find_conversation(id);
            if !conversation.is_valid() {
                bail!("conversation {} not found", id);
            }
            print_conversation(conversation);
        }

        Commands::Validate => {
            let manifest = Manifest::load_from_dir(&cli.data)?;
            let settings = storage::load_settings(&cli.data)?;
            let mut failed = false;

            for locale in manifest.locales() {
                let database = manifest.load_database(locale)?;
                let hash = database.content_hash().unwrap_or_default();
                if !locale.hash.is_empty() && locale.hash != hash {
                    println!("{}: hash mismatch (manifest {}, file {})", locale.name, locale.hash, hash);
                    failed = true;
                }

                let runner = Runner::initialize(database, settings.clone(), &NodeRegistry::new());
                let report = runner.validate_jump_tables();
                if report.is_ok() {
                    println!("{}: ok", locale.name);
                } else {
                    println!("{}:\n{}", locale.name, report);
                    failed = true;
                }
            }

            if failed {
                std::process::exit(1);
            }
        }

        Commands::Play { id, auto, max_nodes } => {
            let manifest = Manifest::load_from_dir(&cli.data)?;
            let locale = select_locale(&manifest, cli.locale.as_deref())?;
            let settings = storage::load_settings(&cli.data)?;
            let mut runner = manifest.create_runner(locale, settings, &NodeRegistry::new())?;

            let listener = Arc::new(ConsoleListener::new(auto, max_nodes));
            let handle = runner.start_conversation(id, listener.clone(), Arc::new(DefaultTaskOwner))?;

            if runner.is_active(handle) {
                let state = runner.conversation_state(handle);
                if state == Some(ConversationState::NodeEnter) && listener.limit_reached() {
                    println!("-- stopping after {} nodes --", max_nodes);
                } else {
                    println!("-- conversation waiting in {:?}; stopping --", state);
                }
                runner.stop_conversation(handle);
            }
        }

        Commands::Scaffold { dir } => {
            scaffold(&dir)?;
            println!("Wrote sample data directory at {:?}", dir);
        }
    }

    Ok(())
}

fn select_locale<'m>(manifest: &'m Manifest, name: Option<&str>) -> Result<&'m Locale> {
    match name {
        Some(name) => manifest
            .find_locale_by_name(name)
            .with_context(|| format!("locale {:?} not in manifest", name)),
        None => manifest.primary_locale().context("manifest has no primary locale"),
    }
}

fn open_database(data: &Path, locale: Option<&str>) -> Result<Database> {
    let manifest = Manifest::load_from_dir(data)?;
    let locale = select_locale(&manifest, locale)?;
    Ok(manifest.load_database(locale)?)
}

fn print_conversation(conversation: ConversationRef<'_>) {
    println!("Conversation {} {:?}", conversation.id(), conversation.name());
    if !conversation.notes().is_empty() {
        println!("  notes: {}", conversation.notes());
    }
    for node in conversation.nodes() {
        let actor = node.actor();
        let speaker = if actor.is_valid() { actor.name() } else { "-" };
        let mut flags = String::new();
        if node.has_condition() {
            flags.push('C');
        }
        if node.has_action() {
            flags.push('A');
        }
        if node.is_prevent_response() {
            flags.push('P');
        }
        println!(
            "  node {:>5} {:<9} {:<3} {:<12} {:?}",
            node.id(),
            format!("{:?}", node.node_type()),
            flags,
            speaker,
            node.voice_text()
        );
        for edge in node.outgoing_edges() {
            println!(
                "        -> {:>5} (edge {}, priority {}, {:?})",
                edge.target().id(),
                edge.id(),
                edge.priority(),
                edge.edge_type()
            );
        }
        for property in node.properties() {
            println!("        {} = {:?}", property.name(), property.value());
        }
    }
}

/// Console listener for `play`
struct ConsoleListener {
    auto: bool,
    max_nodes: usize,
    entered: AtomicUsize,
}

impl ConsoleListener {
    fn new(auto: bool, max_nodes: usize) -> Self {
        Self {
            auto,
            max_nodes,
            entered: AtomicUsize::new(0),
        }
    }

    fn limit_reached(&self) -> bool {
        self.entered.load(Ordering::Relaxed) > self.max_nodes
    }

    fn prompt(&self, count: usize) -> usize {
        let stdin = io::stdin();
        loop {
            print!("> ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return 0,
                Ok(_) => {}
            }
            match line.trim().parse::<usize>() {
                Ok(n) if (1..=count).contains(&n) => return n - 1,
                _ => println!("enter a number between 1 and {}", count),
            }
        }
    }
}

impl ConversationListener for ConsoleListener {
    fn on_conversation_enter(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        println!("== {} ==", conversation.name());
        handle.notify_ready();
    }

    fn on_node_enter(&self, _node: NodeRef<'_>, handle: CompletionHandle) {
        let entered = self.entered.fetch_add(1, Ordering::Relaxed) + 1;
        if entered <= self.max_nodes {
            handle.notify_ready();
        }
    }

    fn on_speech(&self, node: NodeRef<'_>, handle: CompletionHandle) {
        let actor = node.actor();
        let speaker = if actor.is_valid() { actor.localized_name() } else { "" };
        if speaker.is_empty() {
            println!("{}", node.voice_text());
        } else {
            println!("{}: {}", speaker, node.voice_text());
        }
        handle.notify_ready();
    }

    fn on_decision(&self, choices: &[NodeRef<'_>], handle: CompletionHandle) {
        for (i, choice) in choices.iter().enumerate() {
            let text = if choice.ui_response_text().is_empty() {
                choice.voice_text()
            } else {
                choice.ui_response_text()
            };
            println!("  {}. {}", i + 1, text);
        }
        let index = if self.auto { 0 } else { self.prompt(choices.len()) };
        handle.select_choice_by_index(index);
    }

    fn on_conversation_cancelled(&self, conversation: ConversationRef<'_>) {
        println!("== {} (stopped) ==", conversation.name());
    }

    fn on_error(&self, conversation: ConversationRef<'_>, message: &str) {
        eprintln!("error in {}: {}", conversation.name(), message);
    }

    fn on_conversation_exit(&self, conversation: ConversationRef<'_>, handle: CompletionHandle) {
        println!("== end of {} ==", conversation.name());
        handle.notify_ready();
    }
}

fn scaffold(dir: &Path) -> Result<()> {
    let settings = RunnerSettings {
        data_path: dir.to_path_buf(),
        ..RunnerSettings::default()
    };
    runtime::init(&settings)?;

    let mut builder = SnapshotBuilder::new(1, "en");
    let guard = builder.add_actor(ActorSpec::new(1, "Guard"));
    let player = builder.add_actor(ActorSpec::new(2, "Player"));

    let conv = builder.add_conversation(ConversationSpec::new(1, "Gate"));
    let root = builder.add_node(NodeSpec::root(1, conv));
    let halt = builder.add_node(
        NodeSpec::dialogue(2, conv)
            .actor(guard)
            .voice("Halt! State your business."),
    );
    let trade = builder.add_node(
        NodeSpec::dialogue(3, conv)
            .actor(player)
            .voice("I'm here to trade.")
            .ui_response("Trade"),
    );
    let leave = builder.add_node(
        NodeSpec::dialogue(4, conv)
            .actor(player)
            .voice("Never mind.")
            .ui_response("Leave"),
    );
    let open = builder.add_node(
        NodeSpec::dialogue(5, conv)
            .actor(guard)
            .voice("Go on through."),
    );
    builder.add_edge(EdgeSpec::new(1, root, halt));
    builder.add_edge(EdgeSpec::new(2, halt, trade).priority(1));
    builder.add_edge(EdgeSpec::new(3, halt, leave));
    builder.add_edge(EdgeSpec::new(4, trade, open));

    let storage = storage::Storage::new(dir.to_path_buf());
    let path = storage.snapshot_path("en");
    builder.write_to(&path)?;

    let database = Database::open(&path)?;
    let locale = Locale {
        id: 1,
        name: "en".to_string(),
        localized_name: "English".to_string(),
        hash: database.content_hash().unwrap_or_default(),
    };
    Manifest::new(gamescript::VERSION, vec![locale], 0, dir).save()?;
    Ok(())
}
