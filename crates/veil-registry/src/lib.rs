//! Local registry of provisioned servers and issued clients
//!
//! SQLite behind sea-orm. The provisioning orchestrator only sees the
//! narrow [`ProxyRegistry`] trait so its persist and cleanup steps can be
//! tested against in-memory fakes; [`SqlRegistry`] implements it and also
//! carries the richer queries the HTTP layer needs.

pub mod entities;
pub mod migrator;

pub use entities::{client, server};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    Set,
};
use sea_orm_migration::MigratorTrait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),
}

/// Open a database connection.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(url).await
}

/// Run all pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}

/// Fields for a new server row.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub server_ip: String,
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub mask_domain: String,
    pub public_key: String,
    pub proxy_name: String,
}

/// Fields for a new client row.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub uuid: Uuid,
    pub username: String,
}

/// A stored client credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: i32,
    pub server_id: i32,
    pub uuid: Uuid,
    pub username: String,
}

impl From<client::Model> for ClientRecord {
    fn from(model: client::Model) -> Self {
        Self {
            id: model.id,
            server_id: model.server_id,
            uuid: model.uuid,
            username: model.username,
        }
    }
}

/// The registry surface the provisioning orchestrator is injected with.
#[async_trait]
pub trait ProxyRegistry: Send + Sync {
    async fn insert_server(&self, server: NewServer) -> Result<i32, RegistryError>;

    async fn insert_client(&self, server_id: i32, new: NewClient) -> Result<i32, RegistryError>;

    /// Remove every server row for a host address; returns the removed ids
    /// so dependent clients can be purged too.
    async fn delete_servers_by_ip(&self, server_ip: &str) -> Result<Vec<i32>, RegistryError>;

    async fn delete_clients_by_server_id(&self, server_id: i32) -> Result<u64, RegistryError>;

    async fn list_clients_by_server_id(
        &self,
        server_id: i32,
    ) -> Result<Vec<ClientRecord>, RegistryError>;
}

/// sea-orm backed registry.
#[derive(Debug, Clone)]
pub struct SqlRegistry {
    db: DatabaseConnection,
}

impl SqlRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn list_servers(&self) -> Result<Vec<server::Model>, RegistryError> {
        Ok(server::Entity::find().all(&self.db).await?)
    }

    pub async fn find_server(&self, id: i32) -> Result<Option<server::Model>, RegistryError> {
        Ok(server::Entity::find_by_id(id).one(&self.db).await?)
    }

    /// A client joined with the server it was issued for.
    pub async fn find_client_with_server(
        &self,
        client_id: i32,
    ) -> Result<Option<(client::Model, server::Model)>, RegistryError> {
        let found = client::Entity::find_by_id(client_id)
            .find_also_related(server::Entity)
            .one(&self.db)
            .await?;

        Ok(found.and_then(|(client, server)| server.map(|s| (client, s))))
    }

    pub async fn find_client(
        &self,
        server_id: i32,
        client_id: i32,
    ) -> Result<Option<client::Model>, RegistryError> {
        Ok(client::Entity::find_by_id(client_id)
            .filter(client::Column::ServerId.eq(server_id))
            .one(&self.db)
            .await?)
    }

    pub async fn delete_server(&self, id: i32) -> Result<u64, RegistryError> {
        let result = server::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_client(&self, server_id: i32, client_id: i32) -> Result<u64, RegistryError> {
        let result = client::Entity::delete_many()
            .filter(client::Column::Id.eq(client_id))
            .filter(client::Column::ServerId.eq(server_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl ProxyRegistry for SqlRegistry {
    async fn insert_server(&self, new: NewServer) -> Result<i32, RegistryError> {
        let inserted = server::ActiveModel {
            server_ip: Set(new.server_ip),
            ssh_user: Set(new.ssh_user),
            ssh_password: Set(new.ssh_password),
            ssh_port: Set(i32::from(new.ssh_port)),
            mask_domain: Set(new.mask_domain),
            public_key: Set(new.public_key),
            proxy_name: Set(new.proxy_name),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        debug!(server_id = inserted.id, ip = %inserted.server_ip, "server row inserted");
        Ok(inserted.id)
    }

    async fn insert_client(&self, server_id: i32, new: NewClient) -> Result<i32, RegistryError> {
        let inserted = client::ActiveModel {
            server_id: Set(server_id),
            uuid: Set(new.uuid),
            username: Set(new.username),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        Ok(inserted.id)
    }

    async fn delete_servers_by_ip(&self, server_ip: &str) -> Result<Vec<i32>, RegistryError> {
        let ids: Vec<i32> = server::Entity::find()
            .filter(server::Column::ServerIp.eq(server_ip))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();

        if !ids.is_empty() {
            server::Entity::delete_many()
                .filter(server::Column::ServerIp.eq(server_ip))
                .exec(&self.db)
                .await?;
            debug!(ip = %server_ip, count = ids.len(), "server rows purged");
        }

        Ok(ids)
    }

    async fn delete_clients_by_server_id(&self, server_id: i32) -> Result<u64, RegistryError> {
        let result = client::Entity::delete_many()
            .filter(client::Column::ServerId.eq(server_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn list_clients_by_server_id(
        &self,
        server_id: i32,
    ) -> Result<Vec<ClientRecord>, RegistryError> {
        let rows = client::Entity::find()
            .filter(client::Column::ServerId.eq(server_id))
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(ClientRecord::from).collect())
    }
}
