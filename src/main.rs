use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use shiksha::config::Config;
use shiksha::logging;
use shiksha::net::Request;
use shiksha::reachability::Transition;
use shiksha::runtime::Runtime;
use shiksha::services::Language;
use shiksha::store::ProgressUpdate;
use shiksha::tutor::Delivery;

#[derive(Parser, Debug)]
#[command(name = "shiksha")]
#[command(about = "Offline-first tutor core: local lessons, cached requests and a sync queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shiksha/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend URL, overrides the config file
  #[arg(short, long)]
  server: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity and what is stored offline
  Status,
  /// Replay queued writes now
  Sync,
  /// Request a path through the caching gateway
  Fetch {
    path: String,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Load a lesson, from the content service or offline storage
  Lesson {
    topic: String,
    #[arg(short, long, default_value = "beginner")]
    level: String,
  },
  /// Ask the tutor a question
  Ask {
    text: String,
    #[arg(short, long, default_value = "punjabi")]
    language: Language,
  },
  /// Record learning progress for a user
  Progress {
    user: String,
    #[arg(long)]
    lesson_id: Option<String>,
    #[arg(long)]
    completed: bool,
    /// Minutes
    #[arg(long)]
    time_spent: Option<u64>,
    #[arg(long)]
    score: Option<f64>,
    #[arg(long = "achievement")]
    achievements: Vec<String>,
  },
  /// Update user settings from a JSON object
  Settings { user: String, json: String },
  /// Show recent conversations
  History {
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// Keep probing connectivity and sync on every reconnect
  Watch,
  /// Delete all offline data
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(server) = args.server {
    config.server.base_url = server;
    config.base_url()?;
  }

  let log_dir = config.data_dir().map(|dir| dir.join("logs"));
  let _log_guard = logging::init(config.log_level.as_deref(), log_dir.as_deref());

  let mut runtime = Runtime::create(config).await?;
  let result = run(&mut runtime, args.command).await;
  runtime.shutdown();
  result
}

async fn run(runtime: &mut Runtime, command: Command) -> Result<()> {
  match command {
    Command::Status => {
      let online = runtime.reachability().is_online();
      println!("server:        {}", runtime.config().server.base_url);
      println!("connectivity:  {}", if online { "online" } else { "offline" });
      println!("cache:         {}", runtime.gateway().cache_name());
      println!("{}", runtime.offline().storage_stats()?);
    }

    Command::Sync => {
      if !runtime.reachability().is_online() {
        println!("Backend unreachable; {} item(s) stay queued", runtime.offline().sync_queue_len()?);
        return Ok(());
      }
      let report = runtime.processor().process_queue().await?;
      println!("{}", report);
      for item in &report.dropped {
        println!("  dropped: {} {} ({} attempts)", item.method, item.resource_type, item.retry_count);
      }
    }

    Command::Fetch { path, navigate } => {
      let url = runtime
        .config()
        .base_url()?
        .join(&path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
      let request = if navigate { Request::navigate(url) } else { Request::get(url) };
      let resolution = runtime.gateway().resolve(request).await?;
      println!("{} ({:?}, {:?})", resolution.response.status, resolution.class, resolution.source);
      println!("{}", resolution.response.text());
    }

    Command::Lesson { topic, level } => match runtime.tutor().lesson(&topic, &level).await? {
      Some(fetched) => {
        let content = &fetched.lesson.content;
        let origin = if fetched.fresh { "new" } else { "saved offline" };
        println!("{} [{}, {}]", content.title, fetched.lesson.level, origin);
        if !content.explanation.is_empty() {
          println!("\n{}", content.explanation);
        }
        for example in &content.examples {
          println!("\n  {} = {}", example.problem, example.solution);
        }
        for (n, exercise) in content.exercises.iter().enumerate() {
          println!("\n{}. {}", n + 1, exercise.problem);
          for option in &exercise.options {
            println!("   - {}", option);
          }
        }
      }
      None => println!("No lesson available offline for '{}'", topic),
    },

    Command::Ask { text, language } => {
      let answer = runtime.tutor().ask(&text, language).await?;
      println!("{}", answer.response);
      println!(
        "\nintent: {:?}, emotion: {}{}",
        answer.intent.kind,
        answer.sentiment.emotion,
        if answer.offline { " (offline)" } else { "" }
      );
    }

    Command::Progress {
      user,
      lesson_id,
      completed,
      time_spent,
      score,
      achievements,
    } => {
      let update = ProgressUpdate {
        lesson_id,
        completed,
        time_spent,
        score,
        achievements,
      };
      let (progress, delivery) = runtime.tutor().record_progress(&user, &update).await?;
      println!(
        "{}: {} lessons, {} min, {} achievements",
        progress.user_id,
        progress.completed_lessons,
        progress.total_time_spent,
        progress.achievements.len()
      );
      print_delivery(delivery);
    }

    Command::Settings { user, json } => {
      let settings: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Settings must be a JSON object: {}", e))?;
      if !settings.is_object() {
        return Err(eyre!("Settings must be a JSON object"));
      }
      print_delivery(runtime.tutor().update_settings(&user, settings).await?);
    }

    Command::History { limit } => {
      for conversation in runtime.tutor().history(limit).await? {
        println!(
          "[{}]{} {}\n  {}",
          conversation.timestamp.format("%Y-%m-%d %H:%M"),
          if conversation.offline { " (offline)" } else { "" },
          conversation.transcription,
          conversation.response
        );
      }
    }

    Command::Watch => watch(runtime).await?,

    Command::Clear => {
      runtime.offline().clear_all()?;
      println!("Offline data cleared");
    }
  }

  Ok(())
}

fn print_delivery(delivery: Delivery) {
  match delivery {
    Delivery::Sent => println!("Saved to server"),
    Delivery::Queued(id) => println!("Offline: queued for sync (#{})", id),
  }
}

async fn watch(runtime: &mut Runtime) -> Result<()> {
  if runtime.reachability().is_online() {
    let precache = runtime.config().cache.precache.clone();
    runtime.gateway().install(&precache).await;
  }
  for name in runtime.gateway().activate()? {
    println!("Removed old cache {}", name);
  }

  let mut transitions = runtime.reachability().subscribe();
  runtime.start();
  println!(
    "Watching connectivity ({}), Ctrl-C to stop",
    if runtime.reachability().is_online() { "online" } else { "offline" }
  );

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      event = transitions.recv() => match event {
        Ok(Transition::BecameOnline) => println!("Online, syncing queued writes"),
        Ok(Transition::BecameOffline) => println!("Offline, writes will be queued"),
        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
      },
    }
  }

  Ok(())
}
