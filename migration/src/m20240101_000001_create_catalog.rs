use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movies::Table)
                    .if_not_exists()
                    .col(pk_auto(Movies::Id))
                    .col(string(Movies::Title))
                    .col(integer(Movies::ReleaseYear))
                    .col(string_null(Movies::ProductionCompany))
                    .col(string_null(Movies::Distributor))
                    .col(string_null(Movies::Director))
                    .col(string_null(Movies::Writer))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_title_year_unique")
                    .table(Movies::Table)
                    .col(Movies::Title)
                    .col(Movies::ReleaseYear)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Locations::Table)
                    .if_not_exists()
                    .col(pk_auto(Locations::Id))
                    .col(integer(Locations::MovieId))
                    .col(string(Locations::Description))
                    .col(double(Locations::Latitude))
                    .col(double(Locations::Longitude))
                    .col(string_null(Locations::FunFacts))
                    .col(string_null(Locations::Actor1))
                    .col(string_null(Locations::Actor2))
                    .col(string_null(Locations::Actor3))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_locations_movie")
                            .from(Locations::Table, Locations::MovieId)
                            .to(Movies::Table, Movies::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_locations_lat_lng")
                    .table(Locations::Table)
                    .col(Locations::Latitude)
                    .col(Locations::Longitude)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_locations_movie_id")
                    .table(Locations::Table)
                    .col(Locations::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Locations::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Movies::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Movies {
    Table,
    Id,
    Title,
    ReleaseYear,
    ProductionCompany,
    Distributor,
    Director,
    Writer,
}

#[derive(DeriveIden)]
enum Locations {
    Table,
    Id,
    MovieId,
    Description,
    Latitude,
    Longitude,
    FunFacts,
    #[sea_orm(iden = "actor_1")]
    Actor1,
    #[sea_orm(iden = "actor_2")]
    Actor2,
    #[sea_orm(iden = "actor_3")]
    Actor3,
}
