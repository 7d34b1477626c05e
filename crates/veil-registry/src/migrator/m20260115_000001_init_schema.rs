//! Initial schema: servers and their issued clients

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Server::Table)
                    .if_not_exists()
                    .col(pk_auto(Server::Id))
                    .col(string(Server::ServerIp).not_null())
                    .col(string(Server::SshUser).not_null())
                    .col(string(Server::SshPassword).not_null())
                    .col(integer(Server::SshPort).not_null().default(22))
                    .col(string(Server::MaskDomain).not_null())
                    .col(string(Server::PublicKey).not_null())
                    .col(string(Server::ProxyName).not_null())
                    .col(
                        timestamp_with_time_zone(Server::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_server_server_ip")
                    .table(Server::Table)
                    .col(Server::ServerIp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Client::Table)
                    .if_not_exists()
                    .col(pk_auto(Client::Id))
                    .col(integer(Client::ServerId).not_null())
                    .col(uuid(Client::Uuid).not_null())
                    .col(string(Client::Username).not_null())
                    .col(
                        timestamp_with_time_zone(Client::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_client_server_id")
                            .from(Client::Table, Client::ServerId)
                            .to(Server::Table, Server::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_client_server_id")
                    .table(Client::Table)
                    .col(Client::ServerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Client::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Server::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Server {
    Table,
    Id,
    ServerIp,
    SshUser,
    SshPassword,
    SshPort,
    MaskDomain,
    PublicKey,
    ProxyName,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Client {
    Table,
    Id,
    ServerId,
    Uuid,
    Username,
    CreatedAt,
}
