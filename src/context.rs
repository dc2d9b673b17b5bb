use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::extractor::Extractor;
use anyhow::{anyhow, Result};

#[derive(Clone)]
pub struct AppContext {
    database: Option<DatabaseConfig>,
}

impl AppContext {
    pub fn initialize(database: Option<DatabaseConfig>) -> Self {
        Self { database }
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(config) = self.database.as_ref() else {
            return Err(anyhow!(
                "DB_HOST, DB_USER and DB_NAME must be set to use database-backed commands."
            ));
        };
        Ok(Database::connect(config).await?)
    }

    pub fn extractor(&self) -> Extractor {
        Extractor::new(self.database.clone())
    }
}
