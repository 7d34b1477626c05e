//! Server entity: one provisioned remote host

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Address the command channel and share links use
    pub server_ip: String,

    /// SSH login for later management operations
    pub ssh_user: String,
    pub ssh_password: String,
    pub ssh_port: i32,

    /// SNI value the reality listener masquerades as
    pub mask_domain: String,

    /// Public half of the key pair generated during provisioning
    pub public_key: String,

    /// Display name, also the fragment of every share link
    pub proxy_name: String,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Credentials issued for this host
    #[sea_orm(has_many = "super::client::Entity")]
    Client,
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
