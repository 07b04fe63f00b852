use std::collections::BTreeMap;
use std::str::FromStr;
use std::{result, sync::Arc};

use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::http;

use crate::auth::{self, Credentials};
use crate::backend::{Backend, FindError, InsertError};
use crate::question::{Category, Question, QuestionRow};
use crate::session::SessionKey;
use crate::time::Timestamp;
use crate::user::User;

#[derive(Debug)]
pub struct Quiz {
    backend: Backend,
    sessions: SessionKey,
}

/// A request whose session (or fresh login) has been verified.
#[derive(Debug)]
pub struct QuizAuthed {
    quiz: Arc<Quiz>,
    user: User,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    Unauthorized,
    BadRequest,
    Conflict,
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// Stable machine-readable kind, exposed alongside the message.
    pub fn code(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Unauthorized => "auth",
            Self::BadRequest => "validation",
            Self::Conflict => "conflict",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Internal => "internal error",
            // one shape for every auth failure - no user enumeration
            Self::Unauthorized => "invalid credentials or session",
            Self::BadRequest => "invalid request",
            Self::Conflict => "email already registered",
        }
    }
}

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => http::StatusCode::UNAUTHORIZED,
            Self::BadRequest => http::StatusCode::BAD_REQUEST,
            Self::Conflict => http::StatusCode::CONFLICT,
        }
    }
}

impl warp::reject::Reject for Error {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkCorrect {
    #[serde(default)]
    pub question_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub email: String,
    pub created_at: Timestamp,
    pub last_login_at: Timestamp,
    /// One correct-list per category, empty lists included.
    pub progress: BTreeMap<&'static str, Vec<String>>,
}

impl Quiz {
    pub fn new(backend: Backend, sessions: SessionKey) -> Self {
        Self { backend, sessions }
    }

    pub async fn signup(self: &Arc<Self>, creds: Credentials) -> Result<QuizAuthed> {
        creds.validate()?;

        match self.backend.find_user_by_email(&creds.email).await {
            Ok(_) => {
                info!("signup rejected, {} already registered", creds.email);
                return Err(Error::Conflict);
            }
            Err(FindError::NotFound) => {}
            Err(FindError::Internal) => return Err(Error::Internal),
        }

        let now = now()?;
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: creds.email,
            pwhash: auth::hash_password(&creds.password)?,
            created_at: now,
            last_login_at: now,
        };

        self.backend.insert_user(&user).await.map_err(|e| match e {
            // lost a signup race for the same email
            InsertError::Duplicate => Error::Conflict,
            InsertError::Internal => Error::Internal,
        })?;

        info!("{} signed up", user.email);

        Ok(QuizAuthed {
            quiz: Arc::clone(self),
            user,
        })
    }

    pub async fn login(self: &Arc<Self>, creds: Credentials) -> Result<QuizAuthed> {
        creds.validate()?;

        let user = match self.backend.find_user_by_email(&creds.email).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                // same response as a wrong password
                info!("login rejected for unknown email");
                return Err(Error::Unauthorized);
            }
            Err(FindError::Internal) => return Err(Error::Internal),
        };

        if !auth::verify_password(&creds.password, &user.pwhash) {
            info!("{} login rejected: wrong password", user.email);
            return Err(Error::Unauthorized);
        }

        let now = now()?;
        self.backend
            .touch_last_login(&user.id, now)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} logged in (previous login {})", user.email, user.last_login_at);

        Ok(QuizAuthed {
            quiz: Arc::clone(self),
            user: User {
                last_login_at: now,
                ..user
            },
        })
    }

    pub async fn authenticate(self: &Arc<Self>, token: Option<String>) -> Result<QuizAuthed> {
        let token = token.ok_or(Error::Unauthorized)?;
        let user_id = self.sessions.verify(&token)?;

        let user = match self.backend.find_user_by_id(&user_id).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                // a valid signature for a user that's gone
                info!("rejecting session for missing user {user_id}");
                return Err(Error::Unauthorized);
            }
            Err(FindError::Internal) => return Err(Error::Internal),
        };

        debug!("found {} by session", user.email);

        Ok(QuizAuthed {
            quiz: Arc::clone(self),
            user,
        })
    }

    pub async fn questions(&self, category: Category) -> Result<Vec<Question>> {
        let rows = self
            .backend
            .questions(category)
            .await
            .map_err(|()| Error::Internal)?;

        let questions = into_questions(rows, category)?;
        trace!("{} questions in {category}", questions.len());

        Ok(questions)
    }
}

impl QuizAuthed {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn session_token(&self) -> Result<String> {
        self.quiz.sessions.issue(&self.user.id)
    }

    pub async fn me(&self) -> Result<MeResponse> {
        let rows = self
            .quiz
            .backend
            .progress(&self.user.id)
            .await
            .map_err(|()| Error::Internal)?;

        let mut progress: BTreeMap<_, Vec<String>> = Category::ALL
            .iter()
            .map(|c| (c.slug(), Vec::new()))
            .collect();

        for row in rows {
            match Category::from_str(&row.category) {
                Ok(category) => progress
                    .entry(category.slug())
                    .or_default()
                    .push(row.question_id),
                Err(()) => {
                    warn!(
                        "{} has progress in unknown category {}",
                        self.user.email, row.category
                    );
                }
            }
        }

        Ok(MeResponse {
            email: self.user.email.clone(),
            created_at: self.user.created_at,
            last_login_at: self.user.last_login_at,
            progress,
        })
    }

    pub async fn unseen(&self, category: Category) -> Result<Vec<Question>> {
        let email = &self.user.email;
        trace!("{email} requesting unseen questions in {category}");

        let rows = self
            .quiz
            .backend
            .unseen_questions(&self.user.id, category)
            .await
            .map_err(|()| Error::Internal)?;

        let questions = into_questions(rows, category)?;
        info!("{email}, {} unseen in {category}", questions.len());

        Ok(questions)
    }

    pub async fn mark_correct(&self, category: Category, question_id: &str) -> Result<()> {
        if question_id.is_empty() {
            return Err(Error::BadRequest);
        }

        let now = now()?;
        self.quiz
            .backend
            .mark_correct(&self.user.id, category, question_id, now)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{} marked {question_id} correct in {category}", self.user.email);

        Ok(())
    }
}

fn into_questions(rows: Vec<QuestionRow>, category: Category) -> Result<Vec<Question>> {
    rows.into_iter()
        .map(TryInto::try_into)
        .collect::<result::Result<Vec<_>, _>>()
        .map_err(|e| {
            error!("bad question row in {category}: {e}");
            Error::Internal
        })
}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backend;

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }

    fn sample_questions(ids: &[&str]) -> Vec<Question> {
        ids.iter()
            .map(|id| Question {
                id: (*id).into(),
                title: format!("question {id}"),
                code: "print('hi')".into(),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_index: 1,
                explanation: "because".into(),
            })
            .collect()
    }

    async fn create_quiz() -> Arc<Quiz> {
        let backend = backend::test::create_backend().await;
        Arc::new(Quiz::new(backend, SessionKey::new("test-secret")))
    }

    #[tokio::test]
    async fn signup_then_login() {
        let quiz = create_quiz().await;

        let signed_up = quiz.signup(creds("a@x.com", "p")).await.unwrap();
        assert_eq!(signed_up.user().email, "a@x.com");

        // the issued token authenticates
        let token = signed_up.session_token().unwrap();
        let authed = quiz.authenticate(Some(token)).await.unwrap();
        assert_eq!(authed.user().id, signed_up.user().id);

        let logged_in = quiz.login(creds("a@x.com", "p")).await.unwrap();
        assert_eq!(logged_in.user().id, signed_up.user().id);
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let quiz = create_quiz().await;

        quiz.signup(creds("a@x.com", "p")).await.unwrap();

        let err = quiz.signup(creds("a@x.com", "other")).await.unwrap_err();
        assert_eq!(err, Error::Conflict);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let quiz = create_quiz().await;

        quiz.signup(creds("a@x.com", "p")).await.unwrap();

        let unknown = quiz.login(creds("b@x.com", "p")).await.unwrap_err();
        let wrong_password = quiz.login(creds("a@x.com", "wrong")).await.unwrap_err();

        assert_eq!(unknown, Error::Unauthorized);
        assert_eq!(unknown, wrong_password);
    }

    #[tokio::test]
    async fn signup_validates_credentials() {
        let quiz = create_quiz().await;

        let err = quiz.signup(creds("", "p")).await.unwrap_err();
        assert_eq!(err, Error::BadRequest);

        let err = quiz.signup(creds("a@x.com", "")).await.unwrap_err();
        assert_eq!(err, Error::BadRequest);
    }

    #[tokio::test]
    async fn login_updates_last_login() {
        let quiz = create_quiz().await;

        let signed_up = quiz.signup(creds("a@x.com", "p")).await.unwrap();
        let created = signed_up.user().created_at;

        // knock last_login_at into the past, then log in again
        sqlx::query("UPDATE users SET last_login_at = 23")
            .execute(&quiz.backend.0)
            .await
            .unwrap();

        let logged_in = quiz.login(creds("a@x.com", "p")).await.unwrap();
        assert!(logged_in.user().last_login_at >= created);

        let me = logged_in.me().await.unwrap();
        assert!(me.last_login_at >= created);
    }

    #[tokio::test]
    async fn mark_correct_is_idempotent() {
        let quiz = create_quiz().await;
        quiz.backend
            .seed_questions(Category::Python, &sample_questions(&["q1", "q2"]))
            .await
            .unwrap();

        let authed = quiz.signup(creds("a@x.com", "p")).await.unwrap();

        authed.mark_correct(Category::Python, "q1").await.unwrap();
        authed.mark_correct(Category::Python, "q1").await.unwrap();

        let me = authed.me().await.unwrap();
        assert_eq!(me.progress["python"], vec!["q1"]);
    }

    #[tokio::test]
    async fn unseen_excludes_exactly_the_marked_ids() {
        let quiz = create_quiz().await;
        quiz.backend
            .seed_questions(Category::Python, &sample_questions(&["q1", "q2", "q3"]))
            .await
            .unwrap();

        let authed = quiz.signup(creds("a@x.com", "p")).await.unwrap();

        let all: Vec<_> = quiz
            .questions(Category::Python)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(all, vec!["q1", "q2", "q3"]);

        authed.mark_correct(Category::Python, "q2").await.unwrap();

        let unseen: Vec<_> = authed
            .unseen(Category::Python)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(unseen, vec!["q1", "q3"]);
    }

    #[tokio::test]
    async fn progress_is_per_category() {
        let quiz = create_quiz().await;
        quiz.backend
            .seed_questions(Category::Python, &sample_questions(&["q1"]))
            .await
            .unwrap();
        quiz.backend
            .seed_questions(Category::Movies, &sample_questions(&["q1"]))
            .await
            .unwrap();

        let authed = quiz.signup(creds("a@x.com", "p")).await.unwrap();
        authed.mark_correct(Category::Python, "q1").await.unwrap();

        // movies has its own list: the same id is still unseen there
        let unseen: Vec<_> = authed
            .unseen(Category::Movies)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(unseen, vec!["q1"]);

        let me = authed.me().await.unwrap();
        assert_eq!(me.progress["python"], vec!["q1"]);
        assert!(me.progress["movies"].is_empty());
        assert!(me.progress["aws"].is_empty());
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let quiz = create_quiz().await;

        quiz.backend
            .seed_questions(Category::Python, &sample_questions(&["q1", "q2"]))
            .await
            .unwrap();
        quiz.backend
            .seed_questions(Category::Python, &sample_questions(&["q3"]))
            .await
            .unwrap();

        let all = quiz.questions(Category::Python).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn session_for_deleted_user_rejected() {
        let quiz = create_quiz().await;

        let authed = quiz.signup(creds("a@x.com", "p")).await.unwrap();
        let token = authed.session_token().unwrap();

        sqlx::query("DELETE FROM users")
            .execute(&quiz.backend.0)
            .await
            .unwrap();

        let err = quiz.authenticate(Some(token)).await.unwrap_err();
        assert_eq!(err, Error::Unauthorized);
    }

    #[tokio::test]
    async fn missing_session_rejected() {
        let quiz = create_quiz().await;

        let err = quiz.authenticate(None).await.unwrap_err();
        assert_eq!(err, Error::Unauthorized);
    }
}
