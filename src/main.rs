use dotenv::dotenv;
use log::*;

use std::io;
use std::sync::Arc;

mod api_models;
mod models;
mod polls;
mod routes;
mod settings;
mod storage;
mod templates;

use settings::Settings;
use storage::{MemoryRepository, PostgresRepository, Repository};
use templates::Templates;

/**
 * Struct for carrying application state into tide request handlers
 */
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub templates: Arc<Templates>,
}

/**
 * Pick the repository for the configured environment
 *
 * Without a `DATABASE_URL` the polls only live as long as the process does,
 * which is handy for trying things out locally.
 */
async fn create_repository(settings: &Settings) -> Result<Arc<dyn Repository>, storage::Error> {
    match settings.database_url.as_deref() {
        Some(url) => {
            let repo = PostgresRepository::connect(url, settings.max_connections).await?;
            Ok(Arc::new(repo))
        }
        None => {
            warn!("DATABASE_URL is not set, polls will only be kept in memory");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

/**
 * Build the tide server with every route registered
 */
pub fn app(state: AppState) -> tide::Server<AppState> {
    let mut app = tide::with_state(state);
    app.with(driftwood::DevLogger);

    app.at("/").get(routes::index);
    app.at("/:question_id/").get(routes::pages::detail);
    app.at("/:question_id/results/").get(routes::pages::results);
    app.at("/:question_id/vote/").post(routes::pages::vote);

    app.at("/api/v1/questions")
        .get(routes::api::list)
        .put(routes::api::create);
    app.at("/api/v1/questions/:question_id")
        .get(routes::api::get)
        .patch(routes::api::update)
        .delete(routes::api::delete);
    app.at("/api/v1/questions/:question_id/vote").post(routes::api::vote);
    app
}

#[async_std::main]
async fn main() -> Result<(), io::Error> {
    dotenv().ok();
    pretty_env_logger::init();

    let settings = Settings::from_env().map_err(|err| {
        error!("Invalid configuration: {}", err);
        io::Error::new(io::ErrorKind::InvalidInput, err)
    })?;

    let templates = Templates::new().map_err(|err| {
        error!("Could not load templates! {:?}", err);
        io::Error::new(io::ErrorKind::Other, err)
    })?;

    match create_repository(&settings).await {
        Ok(repository) => {
            let state = AppState {
                repository,
                templates: Arc::new(templates),
            };
            info!("Listening on {}", settings.listen_addr);
            app(state).listen(settings.listen_addr).await?;
            Ok(())
        }
        Err(err) => {
            error!("Could not initialize the repository! {:?}", err);
            Err(io::Error::new(io::ErrorKind::Other, err))
        }
    }
}
