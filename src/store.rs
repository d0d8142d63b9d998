use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
    sea_query::{Expr, SimpleExpr},
};

use crate::{
    entities::{location, movie, refresh_history},
    error::AppResult,
    models::{BoundingBox, Coordinates, NewLocation, NewMovie},
};

#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Removes every movie and location. Refresh history is kept.
    pub async fn clear_catalog(&self) -> AppResult<()> {
        let locations = location::Entity::delete_many().exec(&self.db).await?;
        let movies = movie::Entity::delete_many().exec(&self.db).await?;
        tracing::info!(
            locations = locations.rows_affected,
            movies = movies.rows_affected,
            "cleared catalog"
        );
        Ok(())
    }

    /// Returns the movie for `(title, release_year)`, creating it from `new` if absent.
    /// An existing row is never updated. The flag is true when the row was created.
    pub async fn find_or_create_movie(&self, new: &NewMovie) -> AppResult<(movie::Model, bool)> {
        let existing = movie::Entity::find()
            .filter(movie::Column::Title.eq(new.title.as_str()))
            .filter(movie::Column::ReleaseYear.eq(new.release_year))
            .one(&self.db)
            .await?;

        if let Some(existing) = existing {
            return Ok((existing, false));
        }

        let created = movie::ActiveModel {
            id: Default::default(),
            title: Set(new.title.clone()),
            release_year: Set(new.release_year),
            production_company: Set(new.production_company.clone()),
            distributor: Set(new.distributor.clone()),
            director: Set(new.director.clone()),
            writer: Set(new.writer.clone()),
        }
        .insert(&self.db)
        .await?;

        Ok((created, true))
    }

    pub async fn insert_location(
        &self,
        movie_id: i32,
        new: &NewLocation,
        coordinates: Coordinates,
    ) -> AppResult<location::Model> {
        let [actor_1, actor_2, actor_3] = new.actors.clone();
        let model = location::ActiveModel {
            id: Default::default(),
            movie_id: Set(movie_id),
            description: Set(new.description.clone()),
            latitude: Set(coordinates.lat),
            longitude: Set(coordinates.lng),
            fun_facts: Set(new.fun_facts.clone()),
            actor_1: Set(actor_1),
            actor_2: Set(actor_2),
            actor_3: Set(actor_3),
        }
        .insert(&self.db)
        .await?;
        Ok(model)
    }

    pub async fn latest_refresh(&self) -> AppResult<Option<jiff::Timestamp>> {
        let latest = refresh_history::Entity::find()
            .order_by_desc(refresh_history::Column::RefreshedAt)
            .one(&self.db)
            .await?;
        Ok(match latest {
            Some(row) => Some(jiff::Timestamp::from_second(row.refreshed_at)?),
            None => None,
        })
    }

    pub async fn record_refresh(&self, at: jiff::Timestamp) -> AppResult<()> {
        refresh_history::ActiveModel {
            id: Default::default(),
            refreshed_at: Set(at.as_second()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn locations_in_bounds(
        &self,
        bounds: BoundingBox,
        title_prefix: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<(location::Model, movie::Model)>> {
        let mut query = location::Entity::find()
            .find_also_related(movie::Entity)
            .filter(location::Column::Latitude.between(bounds.south, bounds.north))
            .filter(location::Column::Longitude.between(bounds.west, bounds.east));
        if let Some(prefix) = title_prefix {
            query = query.filter(title_starts_with(prefix));
        }

        let rows = query.order_by_asc(location::Column::Id).limit(limit).all(&self.db).await?;
        Ok(rows.into_iter().filter_map(|(loc, movie)| movie.map(|m| (loc, m))).collect())
    }

    pub async fn location_with_movie(
        &self,
        id: i32,
    ) -> AppResult<Option<(location::Model, movie::Model)>> {
        let row = location::Entity::find_by_id(id)
            .find_also_related(movie::Entity)
            .one(&self.db)
            .await?;
        Ok(row.and_then(|(loc, movie)| movie.map(|m| (loc, m))))
    }

    pub async fn movies_by_title_prefix(
        &self,
        prefix: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<movie::Model>> {
        let mut query = movie::Entity::find();
        if let Some(prefix) = prefix {
            query = query.filter(title_starts_with(prefix));
        }
        Ok(query.order_by_asc(movie::Column::Id).limit(limit).all(&self.db).await?)
    }
}

/// Case-sensitive literal prefix match on `movies.title`. SQLite's `LIKE` folds ASCII case and
/// treats `%`/`_` as wildcards, so compare the leading substring instead.
fn title_starts_with(prefix: &str) -> SimpleExpr {
    Expr::cust_with_values(
        r#"substr("movies"."title", 1, length(?)) = ?"#,
        [prefix.to_string(), prefix.to_string()],
    )
}
