use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "social".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "backend".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define the tables the principal loader reads.
///
/// Only the identity columns live here; profile data, posts, follows and the
/// rest of the social schema belong to the services that own them.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        "DEFINE TABLE user SCHEMAFULL;
         DEFINE FIELD user_id ON TABLE user TYPE int;
         DEFINE FIELD username ON TABLE user TYPE string;
         DEFINE FIELD display_name ON TABLE user TYPE option<string>;
         DEFINE FIELD avatar_url ON TABLE user TYPE option<string>;
         DEFINE FIELD is_active ON TABLE user TYPE bool DEFAULT true;
         DEFINE FIELD created_at ON TABLE user TYPE datetime DEFAULT time::now();
         DEFINE FIELD updated_at ON TABLE user TYPE datetime VALUE time::now();
         DEFINE INDEX user_id_idx ON TABLE user COLUMNS user_id UNIQUE;
         DEFINE INDEX username_idx ON TABLE user COLUMNS username UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
