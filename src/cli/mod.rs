use anyhow::{Context, Result};
use chrono::NaiveDate;

use relio::advisor::{NewMemory, ReplyAdvisor};
use relio::config::{Settings, SettingsFile};
use relio::core::{Feedback, MemoryDetail, MemoryKind, ProfileUpdate, RelationshipType, StyleUpdate};

pub use commands::Args;
use commands::{Commands, ContactCommands, MemoryCommands, Rating, SettingsCommands};

mod commands;

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn open(args_data_dir: Option<std::path::PathBuf>) -> Result<ReplyAdvisor> {
    let data_dir = Settings::resolve_data_dir(args_data_dir);
    let settings = Settings::load(data_dir).context("failed to load settings")?;
    Ok(ReplyAdvisor::new(settings))
}

pub async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Settings { command } => handle_settings(command, args.data_dir),
        Commands::Contact { command } => handle_contact(&mut open(args.data_dir)?, command),
        Commands::Suggest { contact, message } => handle_suggest(&mut open(args.data_dir)?, &contact, &message).await,
        Commands::Feedback { contact, turn, index, rating } => {
            handle_feedback(&mut open(args.data_dir)?, &contact, &turn, index, rating)
        }
        Commands::Accept { contact, turn, index } => handle_accept(&mut open(args.data_dir)?, &contact, &turn, index),
        Commands::Memory { command } => handle_memory(&mut open(args.data_dir)?, command).await,
        Commands::Maintenance => handle_maintenance(&mut open(args.data_dir)?),
        Commands::Status { contact } => handle_status(&mut open(args.data_dir)?, contact.as_deref()),
        Commands::Export => {
            let advisor = open(args.data_dir)?;
            for path in advisor.export()? {
                println!("📄 {}", path.display());
            }
            Ok(())
        }
    }
}

fn handle_contact(advisor: &mut ReplyAdvisor, command: ContactCommands) -> Result<()> {
    match command {
        ContactCommands::Add { name, relationship_type } => {
            let relationship_type: RelationshipType = relationship_type.parse()?;
            let profile = advisor.add_contact(&name, relationship_type)?;
            println!("✅ Added {} ({}) [{}]", profile.display_name(), profile.relationship_type, short(&profile.id));
        }
        ContactCommands::List => {
            let profiles = advisor.profiles().list();
            if profiles.is_empty() {
                println!("No contacts yet. Add one with `relio contact add <name>`.");
                return Ok(());
            }
            println!("👥 Contacts ({}):", profiles.len());
            for profile in profiles {
                let (intimacy, stage) = advisor
                    .tracker()
                    .get(&profile.id)
                    .map(|s| (s.intimacy.to_string(), s.stage.to_string()))
                    .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
                println!(
                    "  [{}] {} - {} (intimacy {}, {})",
                    short(&profile.id),
                    profile.display_name(),
                    profile.relationship_type,
                    intimacy,
                    stage
                );
            }
        }
        ContactCommands::Show { contact } => {
            let id = advisor.resolve(&contact)?;
            let profile = advisor.profiles().resolve(&id)?;
            println!("{}", serde_json::to_string_pretty(profile)?);
        }
        ContactCommands::Edit {
            contact,
            name,
            relationship_type,
            notes,
            tags,
            goals,
            avatar,
            formality,
            proactivity,
            expressiveness,
            humor,
            verbosity,
        } => {
            let relationship_type = relationship_type
                .map(|t| t.parse::<RelationshipType>())
                .transpose()?;
            let update = ProfileUpdate {
                name,
                relationship_type,
                notes,
                style_tags: tags,
                goals,
                avatar,
            };
            let style = StyleUpdate {
                formality,
                proactivity,
                expressiveness,
                humor,
                verbosity,
            };
            let profile = advisor.edit_contact(&contact, update, style)?;
            println!("✅ Updated {}", profile.display_name());
        }
        ContactCommands::Remove { contact } => {
            let profile = advisor.remove_contact(&contact)?;
            println!("🗑️  Removed {} and all of its data", profile.display_name());
        }
    }
    Ok(())
}

async fn handle_suggest(advisor: &mut ReplyAdvisor, contact: &str, message: &str) -> Result<()> {
    let outcome = tokio::select! {
        result = advisor.suggest(contact, message) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("⏹️  Cancelled. Nothing was recorded.");
            return Ok(());
        }
    };

    let rec = &outcome.recommendation;
    if let Some(decay) = &outcome.decay {
        println!("⏳ {} ({:+})", decay.reason, decay.delta);
    }
    println!(
        "💬 Strategy: {} | intent: {} | match {:.2} | confidence {:.2}",
        rec.strategy, rec.intent, rec.matching_score, rec.confidence
    );
    for (i, suggestion) in rec.suggestions.iter().enumerate() {
        let marker = if i == 0 { "★" } else { " " };
        println!("{} [{}] ({}) {}", marker, i, suggestion.strategy, suggestion.text);
    }
    println!(
        "Intimacy {} ({}). Turn {}: rate with `relio feedback`, record your pick with `relio accept`.",
        outcome.intimacy,
        outcome.stage,
        short(&outcome.turn_id)
    );
    Ok(())
}

fn handle_feedback(advisor: &mut ReplyAdvisor, contact: &str, turn: &str, index: usize, rating: Rating) -> Result<()> {
    let feedback = match rating {
        Rating::Like => Some(Feedback::Like),
        Rating::Dislike => Some(Feedback::Dislike),
        Rating::Clear => None,
    };

    match advisor.feedback(contact, turn, index, feedback)? {
        Some(outcome) => {
            println!("👍 {} ({:+}), intimacy now {}", outcome.reason, outcome.change, outcome.intimacy);
            println!(
                "   acceptance {:.2}, trust {:.2}, rejections {}, {} weight {:.1}",
                outcome.acceptance_rate,
                outcome.trust_level,
                outcome.rejection_count,
                outcome.strategy,
                outcome.strategy_weight
            );
        }
        None => println!("No change."),
    }
    Ok(())
}

fn handle_accept(advisor: &mut ReplyAdvisor, contact: &str, turn: &str, index: usize) -> Result<()> {
    let change = advisor.accept(contact, turn, index)?;
    println!("✅ {} ({:+}), intimacy now {}", change.reason, change.delta, change.score);
    Ok(())
}

async fn handle_memory(advisor: &mut ReplyAdvisor, command: MemoryCommands) -> Result<()> {
    match command {
        MemoryCommands::Add { contact, kind, content, value, date } => {
            let kind: MemoryKind = kind.parse()?;
            let event_date = date
                .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
                .transpose()
                .context("date must look like 2026-05-01")?;
            let entry = advisor.add_memory(&contact, NewMemory { kind, content, value, event_date })?;
            println!("🧠 Added {} [{}]", entry.kind(), short(&entry.id));
        }
        MemoryCommands::List { contact, kind, all } => {
            let kind = kind.map(|k| k.parse::<MemoryKind>()).transpose()?;
            let entries = advisor.list_memories(&contact, kind, all)?;
            if entries.is_empty() {
                println!("No memories.");
            }
            for entry in entries {
                let detail = match &entry.detail {
                    MemoryDetail::EntityFact { confidence, .. } => format!("confidence {:.2}", confidence),
                    MemoryDetail::RelationshipEvent { impact, event_date, .. } => {
                        format!("{} impact {:+.1}", event_date, impact)
                    }
                    MemoryDetail::CommunicationStrategy { effectiveness, evidence_count, .. } => {
                        format!("effectiveness {:.2}, {} observations", effectiveness, evidence_count)
                    }
                };
                let inactive = if entry.active { "" } else { " (inactive)" };
                println!("  [{}] {}: {} ({}){}", short(&entry.id), entry.kind(), entry.content, detail, inactive);
            }
        }
        MemoryCommands::Remove { id } => {
            let entry = advisor.remove_memory(&id)?;
            println!("🗑️  Removed {}: {}", entry.kind(), entry.content);
        }
        MemoryCommands::Deactivate { id } => {
            let entry = advisor.deactivate_memory(&id)?;
            println!("💤 Deactivated {}: {}", entry.kind(), entry.content);
        }
        MemoryCommands::Confirm { id } => {
            let confidence = advisor.confirm_memory(&id)?;
            println!("✅ Confirmed, confidence {:.2}", confidence);
        }
        MemoryCommands::Edit { id, content } => {
            let entry = advisor.edit_memory(&id, &content)?;
            println!("✏️  Updated {} [{}]: {}", entry.kind(), short(&entry.id), entry.content);
        }
        MemoryCommands::Summary { contact } => {
            let summary = advisor.memory_summary(&contact)?;
            if summary.is_empty() {
                println!("Nothing remembered yet.");
                return Ok(());
            }
            for (title, items) in [
                ("Facts", &summary.facts),
                ("Recent events", &summary.recent_events),
                ("Works well", &summary.effective_strategies),
                ("Avoid", &summary.avoid_strategies),
            ] {
                if items.is_empty() {
                    continue;
                }
                println!("{}:", title);
                for item in items {
                    println!("  - {}", item);
                }
            }
        }
        MemoryCommands::Extract { contact } => {
            let report = tokio::select! {
                result = advisor.extract_memories(&contact) => result?,
                _ = tokio::signal::ctrl_c() => {
                    println!("⏹️  Cancelled.");
                    return Ok(());
                }
            };
            println!(
                "🧠 Facts +{}, events +{}, strategies +{} (reinforced {}), duplicates skipped {}",
                report.facts_added,
                report.events_added,
                report.strategies_added,
                report.strategies_reinforced,
                report.duplicates_skipped
            );
        }
    }
    Ok(())
}

fn handle_maintenance(advisor: &mut ReplyAdvisor) -> Result<()> {
    let report = advisor.maintenance()?;
    let name = |id: &str| {
        advisor
            .profiles()
            .get(id)
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| short(id).to_string())
    };
    for (id, delta) in &report.decayed {
        println!("⏳ {} {:+} (inactivity)", name(id), delta);
    }
    for (id, delta) in &report.penalized {
        println!("👎 {} {:+} (rejected suggestions)", name(id), delta);
    }
    println!(
        "✅ Maintenance done: {} decayed, {} penalized, {} drifting",
        report.decayed.len(),
        report.penalized.len(),
        report.drifting
    );
    Ok(())
}

fn handle_status(advisor: &mut ReplyAdvisor, contact: Option<&str>) -> Result<()> {
    let contact = match contact {
        Some(contact) => contact,
        None => {
            let stats = advisor.overview();
            println!("📊 Relationships: {} total, {} active, {} drifting", stats.total, stats.active, stats.drifting);
            println!("   Average intimacy: {:.1}", stats.avg_intimacy);
            return Ok(());
        }
    };

    let status = advisor.status(contact)?;
    let state = &status.state;
    println!("📊 {} ({})", status.profile.display_name(), status.profile.relationship_type);
    println!("   Intimacy: {} ({})", state.intimacy, status.level);
    println!("   Stage: {}", state.stage);
    println!("   Last contact: {}", status.last_seen);
    println!(
        "   Interactions: {}, acceptance {:.2}, pending rejections {}",
        state.interaction_count, state.acceptance_rate, state.rejection_count
    );
    println!(
        "   Closeness {:.2}, trust {:.2}, frequency {:.2}",
        state.closeness, state.trust_level, state.interaction_frequency
    );
    if !state.strategy_weights.is_empty() {
        let weights: Vec<String> = state
            .strategy_weights
            .iter()
            .map(|(strategy, weight)| format!("{} {:.1}", strategy, weight))
            .collect();
        println!("   Strategy weights: {}", weights.join(", "));
    }
    if status.timeline.len() > 1 {
        let stages: Vec<String> = status
            .timeline
            .iter()
            .map(|c| format!("{} {}", c.at.format("%Y-%m-%d"), c.stage))
            .collect();
        println!("   Timeline: {}", stages.join(" -> "));
    }
    for (text, confidence) in &status.memory.traits {
        println!("   • {} ({:.0}%)", text, confidence * 100.0);
    }
    for (text, impact, date) in &status.memory.events {
        println!("   • {} [{}] ({:+.1})", text, date, impact);
    }
    println!("   Turns recorded: {}", status.turns);
    Ok(())
}

fn handle_settings(command: SettingsCommands, data_dir: Option<std::path::PathBuf>) -> Result<()> {
    let data_dir = Settings::resolve_data_dir(data_dir);
    match command {
        SettingsCommands::Show => {
            let settings = Settings::load(data_dir).context("failed to load settings")?;
            let api = &settings.api;
            println!("⚙️  Data directory: {}", settings.data_dir.display());
            println!("   api-key: {}", api.masked_api_key());
            println!("   base-url: {}", api.base_url);
            println!("   model: {}", api.model);
            println!("   temperature: {}", api.temperature);
            println!("   top-p: {}", api.top_p);
            println!("   frequency-penalty: {}", api.frequency_penalty);
            println!("   max-history: {}", api.max_history);
            println!("   max-tokens: {}", api.max_tokens);
            println!("   timeout: {}s", api.timeout_secs);
            println!("   learn-style: {}", settings.learn_style);

            let weights = &settings.intimacy;
            println!("💞 Intimacy");
            println!("   decay-7-14: {}", weights.decay_7_14);
            println!("   decay-14-30: {}", weights.decay_14_30);
            println!("   decay-30-90: {}", weights.decay_30_90);
            println!("   decay-90-plus: {}", weights.decay_90_plus);
            println!("   like-weight: {}", weights.like_weight);
            println!("   dislike-weight: {}", weights.dislike_weight);
            println!("   acceptance-delta: {}", weights.acceptance_delta);
            println!("   rejection-delta: {}", weights.rejection_delta);
            for (kind, base) in &weights.base_intimacy {
                println!("   base-intimacy.{}: {}", kind.as_str().replace('_', "-"), base);
            }

            let stages = &settings.stages;
            println!("📈 Stages");
            println!("   stage-building: {}", stages.building);
            println!("   stage-stable: {}", stages.stable);
            println!("   stage-close: {}", stages.close);
            println!("   stage-hysteresis: {}", stages.hysteresis);
            println!("   drift-after-days: {}", stages.drift_after_days);
        }
        SettingsCommands::Set { key, value } => {
            let mut file = SettingsFile::load(&data_dir);
            file.set(&key, &value)?;
            // the merged result must still be valid before it is saved
            Settings::resolve(file.clone(), |name| std::env::var(name).ok(), data_dir.clone())?;
            file.save(&data_dir)
                .with_context(|| format!("failed to save settings in {}", data_dir.display()))?;
            if key == "api-key" {
                println!("✅ api-key saved");
            } else {
                println!("✅ {} = {}", key, value);
            }
        }
    }
    Ok(())
}
