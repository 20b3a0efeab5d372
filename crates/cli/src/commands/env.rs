//! Environment Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use storyline_common::{Database, Environment};

use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Add an environment
    Add {
        /// App ID
        #[arg(long)]
        app: String,

        /// Environment name
        #[arg(long)]
        name: String,

        /// Base URL stories navigate to first
        #[arg(long)]
        base_url: String,

        /// Mark as the app's default environment
        #[arg(long)]
        default: bool,
    },

    /// List environments for an app
    List {
        /// App ID
        #[arg(long)]
        app: String,
    },
}

pub async fn execute(cmd: EnvCommands, db: Database, format: OutputFormat) -> Result<()> {
    match cmd {
        EnvCommands::Add {
            app,
            name,
            base_url,
            default,
        } => {
            let mut environment = Environment::new(app, name, base_url);
            environment.is_default = default;
            db.insert_environment(&environment)?;
            print_success(&format!("Environment {} added", environment.id));
        }
        EnvCommands::List { app } => {
            let environments: Vec<EnvDisplay> = db
                .list_environments(&app)?
                .into_iter()
                .map(EnvDisplay::from)
                .collect();
            print_list(&environments, format);
        }
    }

    Ok(())
}

/// Environment display wrapper
#[derive(Serialize)]
pub struct EnvDisplay {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub default: bool,
}

impl From<Environment> for EnvDisplay {
    fn from(env: Environment) -> Self {
        Self {
            id: env.id,
            name: env.name,
            base_url: env.base_url,
            default: env.is_default,
        }
    }
}

impl TableDisplay for EnvDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Base URL", "Default"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.base_url.clone(),
            self.default.to_string(),
        ]
    }
}
