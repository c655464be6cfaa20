/*!
 * Tide endpoints for the site
 *
 * `index` and `pages` serve HTML for browsers, `api` serves JSON. Each
 * endpoint hands off to the `polls` module and only decides which status and
 * body to answer with.
 */
use chrono::Utc;
use log::*;
use serde::Serialize;
use tide::http::mime;
use tide::{Request, Response, StatusCode};

use crate::polls;
use crate::templates::{self, IndexPage};
use crate::AppState;

/**
 * Look up the question id from the `:question_id` route parameter
 */
fn question_id(req: &Request<AppState>) -> Option<i64> {
    req.param::<i64>("question_id").ok()
}

fn render<T: Serialize>(state: &AppState, name: &str, data: &T) -> tide::Result<Response> {
    let body = state.templates.render(name, data)?;
    Ok(Response::builder(StatusCode::Ok)
        .body(body)
        .content_type(mime::HTML)
        .build())
}

fn not_found() -> Response {
    Response::builder(StatusCode::NotFound)
        .body("Question not found")
        .content_type(mime::PLAIN)
        .build()
}

/**
 * Turn a failed poll operation into a plain text response
 */
fn failure(err: polls::Error) -> tide::Result<Response> {
    match err {
        polls::Error::NotFound => Ok(not_found()),
        polls::Error::InvalidSelection | polls::Error::InvalidInput(_) => {
            Ok(Response::builder(StatusCode::BadRequest).body(err.to_string()).build())
        }
        polls::Error::Storage(_) => {
            error!("Storage failure: {}", err);
            Err(tide::Error::new(StatusCode::InternalServerError, err))
        }
    }
}

/**
 *  GET /
 */
pub async fn index(req: Request<AppState>) -> tide::Result<Response> {
    let state = req.state().clone();
    match polls::latest(state.repository.as_ref(), Utc::now()).await {
        Ok(questions) => render(&state, templates::INDEX, &IndexPage { questions: &questions }),
        Err(err) => failure(err),
    }
}

pub mod pages {
    use chrono::Utc;
    use log::*;
    use tide::http::headers::LOCATION;
    use tide::{Request, Response, StatusCode};

    use super::{failure, not_found, question_id, render};
    use crate::api_models::VoteForm;
    use crate::polls;
    use crate::templates::{self, DetailPage, ResultsPage};
    use crate::AppState;

    pub const NO_SELECTION: &str = "You didn't select a choice.";

    /**
     *  GET /:question_id/
     */
    pub async fn detail(req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return Ok(not_found()),
        };
        debug!("Fetching question: {}", id);

        let state = req.state().clone();
        match polls::detail(state.repository.as_ref(), id, Utc::now()).await {
            Ok(poll) => render(&state, templates::DETAIL, &DetailPage { poll: &poll, error_message: None }),
            Err(err) => failure(err),
        }
    }

    /**
     *  GET /:question_id/results/
     */
    pub async fn results(req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return Ok(not_found()),
        };

        let state = req.state().clone();
        match polls::results(state.repository.as_ref(), id).await {
            Ok(poll) => render(&state, templates::RESULTS, &ResultsPage { poll: &poll }),
            Err(err) => failure(err),
        }
    }

    /**
     *  POST /:question_id/vote/
     *
     * A counted vote redirects to the results page, so reloading the browser
     * afterwards never submits the vote a second time.
     */
    pub async fn vote(mut req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return Ok(not_found()),
        };

        let body = req.body_string().await?;
        let form: VoteForm = serde_qs::from_str(&body).unwrap_or_else(|err| {
            warn!("Unreadable vote form for question {}: {}", id, err);
            VoteForm::default()
        });

        let state = req.state().clone();
        let repository = state.repository.as_ref();
        match polls::vote(repository, id, form.choice_id()).await {
            Ok(_) => Ok(Response::builder(StatusCode::SeeOther)
                .header(LOCATION, polls::results_path(id).as_str())
                .build()),
            Err(polls::Error::InvalidSelection) => {
                let poll = match polls::results(repository, id).await {
                    Ok(poll) => poll,
                    Err(err) => return failure(err),
                };
                render(&state, templates::DETAIL, &DetailPage { poll: &poll, error_message: Some(NO_SELECTION) })
            }
            Err(err) => failure(err),
        }
    }
}

/**
 * JSON endpoints for managing questions outside of the browser
 */
pub mod api {
    use chrono::Utc;
    use log::*;
    use serde_json::json;
    use tide::{Body, Request, Response, StatusCode};

    use super::question_id;
    use crate::api_models::{
        Ballot, PollResponse, QuestionCreateRequest, QuestionListQuery, QuestionSummary, QuestionUpdateRequest,
    };
    use crate::polls;
    use crate::AppState;

    fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> tide::Result<Response> {
        Ok(Response::builder(status).body(Body::from_json(value)?).build())
    }

    fn failure(err: polls::Error) -> tide::Result<Response> {
        let status = match err {
            polls::Error::NotFound => StatusCode::NotFound,
            polls::Error::InvalidSelection | polls::Error::InvalidInput(_) => StatusCode::BadRequest,
            polls::Error::Storage(_) => {
                error!("Storage failure: {}", err);
                return Err(tide::Error::new(StatusCode::InternalServerError, err));
            }
        };
        json_response(status, &json!({ "error": err.to_string() }))
    }

    fn unknown_question() -> tide::Result<Response> {
        failure(polls::Error::NotFound)
    }

    /**
     *  GET /api/v1/questions
     *
     * Passing `all`, `search`, `since` or `until` in the query string lists
     * every stored question instead of just the latest published ones.
     */
    pub async fn list(req: Request<AppState>) -> tide::Result<Response> {
        let query: QuestionListQuery = match serde_qs::from_str(req.url().query().unwrap_or("")) {
            Ok(query) => query,
            Err(err) => {
                warn!("Unreadable question listing query: {}", err);
                return failure(polls::Error::InvalidInput("since and until must be RFC 3339 timestamps"));
            }
        };

        let now = Utc::now();
        let repository = req.state().repository.as_ref();
        let questions = if query.wants_everything() {
            polls::all(repository, query.into_filter()).await
        } else {
            polls::latest(repository, now).await
        };

        match questions {
            Ok(questions) => {
                let summaries: Vec<QuestionSummary> =
                    questions.into_iter().map(|q| QuestionSummary::new(q, now)).collect();
                json_response(StatusCode::Ok, &summaries)
            }
            Err(err) => failure(err),
        }
    }

    /**
     *  PUT /api/v1/questions
     */
    pub async fn create(mut req: Request<AppState>) -> tide::Result<Response> {
        let request: QuestionCreateRequest = req.body_json().await?;
        debug!("Question received: {:?}", request);

        let now = Utc::now();
        let state = req.state().clone();
        match polls::create(
            state.repository.as_ref(),
            request.question_text,
            request.pub_date,
            request.choices,
            now,
        )
        .await
        {
            Ok(poll) => json_response(StatusCode::Created, &PollResponse::new(poll, now)),
            Err(err) => failure(err),
        }
    }

    /**
     *  GET /api/v1/questions/:question_id
     */
    pub async fn get(req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return unknown_question(),
        };

        match polls::results(req.state().repository.as_ref(), id).await {
            Ok(poll) => json_response(StatusCode::Ok, &PollResponse::new(poll, Utc::now())),
            Err(err) => failure(err),
        }
    }

    /**
     *  POST /api/v1/questions/:question_id/vote
     */
    pub async fn vote(mut req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return unknown_question(),
        };
        let body = req.body_string().await?;
        let ballot: Ballot = serde_json::from_str(&body).unwrap_or_else(|err| {
            warn!("Unreadable ballot for question {}: {}", id, err);
            Ballot::default()
        });

        let state = req.state().clone();
        match polls::vote(state.repository.as_ref(), id, ballot.choice_id()).await {
            Ok(choice) => json_response(StatusCode::Ok, &choice),
            Err(err) => failure(err),
        }
    }

    /**
     *  PATCH /api/v1/questions/:question_id
     */
    pub async fn update(mut req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return unknown_question(),
        };
        let request: QuestionUpdateRequest = req.body_json().await?;
        debug!("Changes received for question {}: {:?}", id, request);

        let changes = match request.into_changes() {
            Some(changes) => changes,
            None => {
                return failure(polls::Error::InvalidInput(
                    "each choice needs a choice_text, an id with a choice_text, or an id with delete",
                ))
            }
        };

        let state = req.state().clone();
        match polls::update(state.repository.as_ref(), id, changes).await {
            Ok(poll) => json_response(StatusCode::Ok, &PollResponse::new(poll, Utc::now())),
            Err(err) => failure(err),
        }
    }

    /**
     *  DELETE /api/v1/questions/:question_id
     */
    pub async fn delete(req: Request<AppState>) -> tide::Result<Response> {
        let id = match question_id(&req) {
            Some(id) => id,
            None => return unknown_question(),
        };

        match polls::delete(req.state().repository.as_ref(), id).await {
            Ok(()) => Ok(Response::new(StatusCode::NoContent)),
            Err(err) => failure(err),
        }
    }
}
