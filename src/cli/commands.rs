use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relio")]
#[command(about = "Relationship-aware reply suggestions for your chats")]
#[command(version)]
pub struct Args {
    /// Data directory (defaults to RELIO_DATA_DIR, then the platform config dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage contacts
    Contact {
        #[command(subcommand)]
        command: ContactCommands,
    },
    /// Suggest replies to a message from a contact
    Suggest {
        /// Contact name or id
        contact: String,
        /// The message you received
        message: String,
    },
    /// Rate one suggestion of a turn
    Feedback {
        contact: String,
        /// Turn id or id prefix
        turn: String,
        /// Suggestion index, 0 is the primary
        index: usize,
        rating: Rating,
    },
    /// Record which suggestion you actually sent
    Accept {
        contact: String,
        turn: String,
        index: usize,
    },
    /// Manage long-term memories
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Apply inactivity decay and the weekly rejection penalty
    Maintenance,
    /// Show relationship status for one contact, or an overview
    Status {
        contact: Option<String>,
    },
    /// Write profile and relationship summary reports
    Export,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Rating {
    Like,
    Dislike,
    Clear,
}

#[derive(Subcommand)]
pub enum ContactCommands {
    /// Add a contact
    Add {
        name: String,
        /// family, partner, close-friend, friend, colleague, acquaintance, stranger
        #[arg(long = "type", default_value = "friend")]
        relationship_type: String,
    },
    /// List contacts
    List,
    /// Show one contact
    Show { contact: String },
    /// Edit a contact's profile and style
    Edit {
        contact: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        relationship_type: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        goals: Option<Vec<String>>,
        #[arg(long)]
        avatar: Option<PathBuf>,
        #[arg(long)]
        formality: Option<f64>,
        #[arg(long)]
        proactivity: Option<f64>,
        #[arg(long)]
        expressiveness: Option<f64>,
        #[arg(long)]
        humor: Option<f64>,
        #[arg(long)]
        verbosity: Option<f64>,
    },
    /// Remove a contact with all of its history and memories
    Remove { contact: String },
}

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Add a memory by hand
    Add {
        contact: String,
        /// fact, event or strategy
        kind: String,
        content: String,
        /// Confidence, impact or effectiveness depending on the kind
        #[arg(long, allow_hyphen_values = true)]
        value: Option<f64>,
        /// Event date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// List memories of a contact
    List {
        contact: String,
        #[arg(long)]
        kind: Option<String>,
        /// Include deactivated memories
        #[arg(long)]
        all: bool,
    },
    /// Delete a memory
    Remove {
        /// Memory id or id prefix
        id: String,
    },
    /// Keep a memory but leave it out of prompts and summaries
    Deactivate { id: String },
    /// Confirm a fact, raising its confidence
    Confirm { id: String },
    /// Replace a memory's text
    Edit { id: String, content: String },
    /// Show what the reply prompt will know about a contact
    Summary { contact: String },
    /// Extract memories from recent conversation turns
    Extract { contact: String },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show effective settings
    Show,
    /// Save a setting
    Set { key: String, value: String },
}
