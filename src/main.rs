use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use clinic_sync::backup::ImportMode;
use clinic_sync::document::Entity;
use clinic_sync::observability::init_observability;
use clinic_sync::sync::PushOutcome;
use clinic_sync::{ClinicStore, Durability, config, open_store};

#[derive(Parser)]
#[command(name = "clinic-sync", about = "Clinic Sync - local-first clinic document sync")]
struct Cli {
	/// Refuse changes unless they can be pushed right away
	#[arg(long, global = true)]
	cloud: bool,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Print the sync status and local revision (default)
	Status,
	/// Print the local document as JSON
	Show,
	/// Pull the remote document and merge it into the local one
	Pull {
		/// Merge even when the remote revision is not newer
		#[arg(long)]
		force: bool,
	},
	/// Push the local document to the remote store
	Push,
	/// Export the local document to a backup file
	Export { path: PathBuf },
	/// Import a backup file
	Import {
		path: PathBuf,
		/// Replace the local document instead of merging
		#[arg(long)]
		replace: bool,
	},
	/// Insert or update an entity
	Add {
		#[arg(long)]
		collection: String,
		#[arg(long)]
		id: String,
		/// Entity fields as a JSON object
		#[arg(long, default_value = "{}")]
		json: String,
	},
	/// Remove an entity (records a tombstone)
	Remove {
		#[arg(long)]
		collection: String,
		#[arg(long)]
		id: String,
	},
}

fn parse_entity(id: &str, raw: &str) -> Result<Entity> {
	let Value::Object(fields) = serde_json::from_str::<Value>(raw).context("--json is not valid JSON")? else {
		bail!("--json must be a JSON object");
	};
	Ok(fields
		.into_iter()
		.fold(Entity::new(id), |entity, (key, value)| entity.with_field(key, value)))
}

fn print_json(value: &Value) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn report_push(store: &ClinicStore, outcome: PushOutcome) -> Result<()> {
	print_json(&json!({
		"revision": store.document().revision,
		"push": outcome,
		"status": store.engine().status().get(),
	}))
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config, using defaults: {}", e);
			config::Settings::default()
		}
	};

	let observability = init_observability(settings.log_level)?;
	let store = open_store(&settings, Some(observability.metrics.clone()))?;
	let durability = if cli.cloud {
		Durability::Cloud
	} else {
		Durability::Local
	};

	match cli.command.unwrap_or(Commands::Status) {
		Commands::Status => {
			let doc = store.document();
			print_json(&json!({
				"device": settings.device_name,
				"status": store.engine().status().get(),
				"revision": doc.revision,
				"entities": doc.live_entity_count(),
				"tombstones": doc.tombstones.len(),
			}))?;
		}
		Commands::Show => {
			print_json(&serde_json::to_value(store.document().as_ref())?)?;
		}
		Commands::Pull { force } => {
			let outcome = store.refresh(force).await?;
			print_json(&serde_json::to_value(outcome)?)?;
		}
		Commands::Push => {
			let outcome = store.try_push_now().await?;
			report_push(&store, outcome)?;
		}
		Commands::Export { path } => {
			store.export(&path)?;
			println!("Exported revision {} to {}", store.document().revision, path.display());
		}
		Commands::Import { path, replace } => {
			if replace {
				let commit = store.import_replace(&path)?;
				let outcome = commit.push_outcome().await;
				report_push(&store, outcome)?;
			} else {
				store.import(&path, ImportMode::Merge)?;
				println!("Merged {} into revision {}", path.display(), store.document().revision);
			}
		}
		Commands::Add { collection, id, json } => {
			let entity = parse_entity(&id, &json)?;
			let outcome = store.upsert(&collection, entity, durability)?.push_outcome().await;
			report_push(&store, outcome)?;
		}
		Commands::Remove { collection, id } => {
			let outcome = store.remove(&collection, &id, durability)?.push_outcome().await;
			report_push(&store, outcome)?;
		}
	}

	Ok(())
}
