use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graph_sketch::app::App;
use graph_sketch::config::Config;
use graph_sketch::event::AppEvent;
use graph_sketch::logging;
use graph_sketch::prefs::Language;
use graph_sketch::sketch::admin::AdminConfig;
use graph_sketch::sketch::DeleteOutcome;
use graph_sketch::worker::{
  CacheStorage, OfflineCacheController, PageClient, ReqwestNetwork, Request,
};

#[derive(Parser, Debug)]
#[command(name = "graph-sketch")]
#[command(about = "Local-first storage for sewer network sketches")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/graph-sketch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List saved sketches, most recent first
  List,
  /// Start a new, empty sketch
  New,
  /// Make a saved sketch the current one
  Open { id: String },
  /// Rename a saved sketch (an empty name clears it)
  Rename { id: String, name: String },
  /// Copy a saved sketch under a new id
  Duplicate { id: String },
  /// Delete a saved sketch
  Delete { id: String },
  /// Write the current sketch, or the whole library, to a JSON file
  Export {
    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    library: bool,
  },
  /// Load a sketch file as the current sketch, or add a library file's sketches
  Import {
    file: PathBuf,
    #[arg(long)]
    library: bool,
  },
  /// Write node and edge CSV tables for the current sketch
  Csv {
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
  },
  /// Show what startup restored from the durable store
  Restore,
  /// Edit nodes of the current sketch
  Node {
    #[command(subcommand)]
    command: NodeCommand,
  },
  /// Edit edges of the current sketch
  Edge {
    #[command(subcommand)]
    command: EdgeCommand,
  },
  /// Turn saving into the library on every edit on or off
  Autosave {
    #[arg(value_parser = ["on", "off"])]
    state: String,
  },
  /// Set the interface language
  Lang {
    #[arg(value_parser = ["he", "en"])]
    language: String,
  },
  /// Show or replace the admin settings
  Admin {
    #[command(subcommand)]
    command: AdminCommand,
  },
  /// Offline cache worker
  Worker {
    #[command(subcommand)]
    command: WorkerCommand,
  },
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
  Add {
    x: f64,
    y: f64,
    /// Create a Home node
    #[arg(long)]
    home: bool,
  },
  Delete {
    id: String,
    /// Also remove attached edges
    #[arg(long)]
    force: bool,
  },
  /// Change a node's id; edges follow it
  Rename { id: String, new_id: String },
  /// Mark a Home node as directly connected, or clear it with --off
  Connect {
    id: String,
    #[arg(long)]
    off: bool,
  },
  /// Replace a node's note
  Note { id: String, text: String },
}

#[derive(Subcommand, Debug)]
enum EdgeCommand {
  Add { tail: String, head: String },
  Delete { id: f64 },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
  /// Print the admin settings as JSON
  Show,
  /// Replace the admin settings from a JSON file
  Load { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
  /// Install the worker and fetch a URL through it
  Fetch {
    url: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
  std::fs::write(path, contents)
    .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
  println!("Wrote {}", path.display());
  Ok(())
}

async fn run(app: &mut App, command: Command) -> Result<()> {
  match command {
    Command::List => {
      let current = app.current()?.sketch_id;
      for record in app.list() {
        let marker = if current.as_deref() == Some(record.id.as_str()) {
          "*"
        } else {
          " "
        };
        println!(
          "{} {}  {}  {} nodes  {}",
          marker,
          record.id,
          record.display_title(),
          record.nodes.len(),
          record.updated_at
        );
      }
    }
    Command::New => {
      app.new_sketch()?;
      println!("Started a new sketch");
    }
    Command::Open { id } => {
      app.open(&id)?;
      println!("Opened {}", id);
    }
    Command::Rename { id, name } => {
      let record = app.rename(&id, &name)?;
      println!("Renamed {} to {}", id, record.display_title());
    }
    Command::Duplicate { id } => {
      let copy = app.duplicate(&id)?;
      println!("Duplicated {} as {}", id, copy.id);
    }
    Command::Delete { id } => {
      app.delete(&id)?;
      println!("Deleted {}", id);
    }
    Command::Export { out, library } => {
      if library {
        let contents = app.export_library()?;
        let name = format!("sketches_{}.json", chrono::Local::now().format("%Y-%m-%d"));
        write_file(&out.join(name), contents.as_bytes())?;
      } else {
        let (name, contents) = app.export_sketch()?;
        write_file(&out.join(name), contents.as_bytes())?;
      }
    }
    Command::Import { file, library } => {
      let raw = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      if library {
        let ids = app.import_library(&raw)?;
        println!("Imported {} sketches", ids.len());
      } else {
        app.import_sketch(&raw)?;
        println!("Imported {}", file.display());
      }
    }
    Command::Csv { out } => {
      let (nodes, edges) = app.export_csv()?;
      let date = chrono::Local::now().format("%Y-%m-%d");
      write_file(&out.join(format!("nodes_{}.csv", date)), &nodes)?;
      write_file(&out.join(format!("edges_{}.csv", date)), &edges)?;
    }
    Command::Restore => {
      let report = app.restore_report();
      println!(
        "current sketch restored: {}, library restored: {}",
        report.current_restored, report.library_restored
      );
    }
    Command::Node { command } => match command {
      NodeCommand::Add { x, y, home } => {
        let id = app.add_node(x, y, home)?;
        println!("Added node {}", id);
      }
      NodeCommand::Delete { id, force } => match app.delete_node(&id, force)? {
        DeleteOutcome::Deleted { removed_edges } => {
          println!("Deleted node {} and {} edges", id, removed_edges)
        }
        DeleteOutcome::NeedsConfirmation { edge_count } => {
          return Err(eyre!(
            "Node {} has {} edges; pass --force to delete them too",
            id,
            edge_count
          ))
        }
        DeleteOutcome::NotFound => return Err(eyre!("No node with id {}", id)),
      },
      NodeCommand::Rename { id, new_id } => {
        app.rename_node(&id, &new_id)?;
        println!("Renamed node {} to {}", id, new_id.trim());
      }
      NodeCommand::Connect { id, off } => {
        let new_id = app.set_direct_connection(&id, !off)?;
        println!("Node {} is now {}", id, new_id);
      }
      NodeCommand::Note { id, text } => {
        app.set_node_note(&id, &text)?;
        println!("Updated note on node {}", id);
      }
    },
    Command::Edge { command } => match command {
      EdgeCommand::Add { tail, head } => match app.add_edge(&tail, &head)? {
        Some(edge) => println!("Added edge {} -> {} ({})", tail, head, edge),
        None => return Err(eyre!("Cannot connect {} and {}", tail, head)),
      },
      EdgeCommand::Delete { id } => {
        if !app.delete_edge(id)? {
          return Err(eyre!("No edge with id {}", id));
        }
        println!("Deleted edge {}", id);
      }
    },
    Command::Autosave { state } => {
      app.set_autosave(state == "on")?;
      println!("Autosave {}", state);
    }
    Command::Lang { language } => {
      let language: Language = language.parse().unwrap_or_default();
      app.set_language(language)?;
      println!("Language set to {}", language);
    }
    Command::Admin { command } => match command {
      AdminCommand::Show => {
        let raw = serde_json::to_string_pretty(app.admin())
          .map_err(|e| eyre!("Failed to serialize admin settings: {}", e))?;
        println!("{}", raw);
      }
      AdminCommand::Load { file } => {
        let raw = std::fs::read_to_string(&file)
          .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
        let admin: AdminConfig = serde_json::from_str(&raw)
          .map_err(|e| eyre!("Invalid admin settings in {}: {}", file.display(), e))?;
        app.save_admin(admin)?;
        println!("Saved admin settings from {}", file.display());
      }
    },
    Command::Worker { command } => match command {
      WorkerCommand::Fetch { url, navigate } => {
        fetch_through_worker(app.config(), &url, navigate).await?
      }
    },
  }
  Ok(())
}

async fn fetch_through_worker(config: &Config, url: &str, navigate: bool) -> Result<()> {
  let settings = config.worker.settings()?;
  let network = ReqwestNetwork::new().map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
  let mut worker =
    OfflineCacheController::new(settings, Arc::new(CacheStorage::new()), Arc::new(network));
  let mut page = PageClient::new(None);
  page
    .register(&mut worker)
    .await
    .map_err(|e| eyre!("Failed to install offline worker: {}", e))?;

  let url = url::Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let request = if navigate {
    Request::navigate(url)
  } else {
    Request::get(url)
  };
  match worker.fetch(&request).await {
    Some(result) => println!(
      "{} {:?} via {:?} ({} bytes)",
      result.response.status,
      result.source,
      result.route,
      result.response.body.len()
    ),
    None => println!("Not intercepted"),
  }
  worker.settle().await;
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log_dir()?)?;

  let mut app = App::bootstrap(config).await?;
  let result = run(&mut app, args.command).await;
  app.shutdown().await?;

  for event in app.drain_events() {
    if let AppEvent::Toast { kind, message } = event {
      eprintln!("{:?}: {}", kind, message);
    }
  }

  result
}
