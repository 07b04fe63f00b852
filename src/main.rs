mod args;
mod auth;
mod backend;
mod question;
mod quiz;
mod session;
mod time;
mod user;

use std::sync::Arc;

use clap::Parser;
use log::error;
use serde::Serialize;
use warp::{http, Filter, Reply};

use args::Args;
use auth::Credentials;
use backend::Backend;
use question::Category;
use quiz::{Error, MarkCorrect, Quiz};
use session::SessionKey;

#[derive(Serialize)]
struct Success {
    success: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    code: &'static str,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let args = Args::parse();
    let addr = args.addr().expect("invalid listen address");

    let backend = Backend::new(args.data_dir()).await;
    let quiz = Arc::new(Quiz::new(backend, SessionKey::new(args.session_secret())));

    warp::serve(routes(quiz, args.secure())).run(addr).await;
}

fn routes(
    quiz: Arc<Quiz>,
    secure: bool,
) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
    let with_quiz = warp::any().map(move || Arc::clone(&quiz));
    let session = warp::cookie::optional::<String>(session::SESSION_COOKIE);

    let signup = warp::path!("auth" / "signup")
        .and(warp::post())
        .and(with_quiz.clone())
        .and(warp::body::json())
        .and_then(move |quiz: Arc<Quiz>, creds: Credentials| async move {
            let authed = quiz.signup(creds).await.map_err(warp::reject::custom)?;
            let token = authed.session_token().map_err(warp::reject::custom)?;

            Ok::<_, warp::Rejection>(success_with_cookie(session::session_cookie(
                &token, secure,
            )))
        });

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(with_quiz.clone())
        .and(warp::body::json())
        .and_then(move |quiz: Arc<Quiz>, creds: Credentials| async move {
            let authed = quiz.login(creds).await.map_err(warp::reject::custom)?;
            let token = authed.session_token().map_err(warp::reject::custom)?;

            Ok::<_, warp::Rejection>(success_with_cookie(session::session_cookie(
                &token, secure,
            )))
        });

    // stateless sessions: all we can do is tell the client to drop the cookie
    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .map(move || success_with_cookie(session::clear_session_cookie(secure)));

    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(with_quiz.clone())
        .and(session)
        .and_then(|quiz: Arc<Quiz>, token: Option<String>| async move {
            let authed = quiz.authenticate(token).await.map_err(warp::reject::custom)?;
            let me = authed.me().await.map_err(warp::reject::custom)?;

            Ok::<_, warp::Rejection>(warp::reply::json(&me))
        });

    let questions = warp::path!("api" / String)
        .and(warp::get())
        .and(with_quiz.clone())
        .and_then(|slug: String, quiz: Arc<Quiz>| async move {
            let category = parse_category(&slug)?;
            let questions = quiz
                .questions(category)
                .await
                .map_err(warp::reject::custom)?;

            Ok::<_, warp::Rejection>(warp::reply::json(&questions))
        });

    let unseen = warp::path!("api" / String / "new")
        .and(warp::get())
        .and(with_quiz.clone())
        .and(session)
        .and_then(
            |slug: String, quiz: Arc<Quiz>, token: Option<String>| async move {
                let category = parse_category(&slug)?;
                let authed = quiz.authenticate(token).await.map_err(warp::reject::custom)?;
                let questions = authed.unseen(category).await.map_err(warp::reject::custom)?;

                Ok::<_, warp::Rejection>(warp::reply::json(&questions))
            },
        );

    let mark_correct = warp::path!("api" / String / "mark-correct")
        .and(warp::post())
        .and(with_quiz)
        .and(session)
        .and(warp::body::json())
        .and_then(
            |slug: String, quiz: Arc<Quiz>, token: Option<String>, body: MarkCorrect| async move {
                let category = parse_category(&slug)?;
                let authed = quiz.authenticate(token).await.map_err(warp::reject::custom)?;

                let question_id = body
                    .question_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| warp::reject::custom(Error::BadRequest))?;

                authed
                    .mark_correct(category, &question_id)
                    .await
                    .map_err(warp::reject::custom)?;

                Ok::<_, warp::Rejection>(warp::reply::json(&Success { success: true }))
            },
        );

    signup
        .or(login)
        .or(logout)
        .or(me)
        .or(questions)
        .or(unseen)
        .or(mark_correct)
        .recover(handle_rejection)
        .with(warp::log("quizd"))
}

fn parse_category(slug: &str) -> Result<Category, warp::Rejection> {
    slug.parse().map_err(|()| warp::reject::reject())
}

fn success_with_cookie(cookie: String) -> impl Reply {
    warp::reply::with_header(
        warp::reply::json(&Success { success: true }),
        http::header::SET_COOKIE,
        cookie,
    )
}

async fn handle_rejection(
    err: warp::Rejection,
) -> Result<impl Reply, std::convert::Infallible> {
    let (status, body) = if err.is_not_found() {
        (
            http::StatusCode::NOT_FOUND,
            ErrorBody {
                error: "not found",
                code: "not_found",
            },
        )
    } else if let Some(&e) = err.find::<Error>() {
        (
            e.into(),
            ErrorBody {
                error: e.message(),
                code: e.code(),
            },
        )
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        let e = Error::BadRequest;
        (
            e.into(),
            ErrorBody {
                error: e.message(),
                code: e.code(),
            },
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            http::StatusCode::METHOD_NOT_ALLOWED,
            ErrorBody {
                error: "method not allowed",
                code: "method_not_allowed",
            },
        )
    } else {
        error!("unhandled rejection: {err:?}");
        let e = Error::Internal;
        (
            e.into(),
            ErrorBody {
                error: e.message(),
                code: e.code(),
            },
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
