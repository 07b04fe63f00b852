use std::future::Future;
use std::path::{Path, PathBuf};

use log::{error, info};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool, Transaction};

use crate::question::{Category, Question, QuestionRow};
use crate::time::Timestamp;
use crate::user::User;

type Result<T> = std::result::Result<T, ()>;

#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum InsertError {
    Duplicate,
    Internal,
}

/// One row of a user's correct-list.
#[derive(Debug)]
#[derive(sqlx::FromRow)]
pub struct ProgressRow {
    pub category: String,
    pub question_id: String,
}

#[derive(Debug)]
pub struct Backend(pub Pool<Sqlite>);

fn into_db(path: &Path) -> PathBuf {
    path.join("quiz.db")
}

pub async fn init(data_dir: &Path) {
    let url = format!(
        "sqlite://{}",
        into_db(data_dir).to_str().expect("non utf-8 data")
    );

    match Sqlite::create_database(&url).await {
        Ok(()) => {
            info!("created {url}");
        }
        Err(e) => panic!("error creating database: {e}"),
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Self {
        let db_pathbuf = into_db(data_dir);
        let db_path = db_pathbuf.to_str().expect("non utf-8 data");
        let pool = match SqlitePool::connect(db_path).await {
            Ok(pool) => pool,
            Err(_err) => {
                init(data_dir).await;
                SqlitePool::connect(db_path).await.expect("db connection")
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migration");

        Self(pool)
    }

    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {e:?}");
        })?;

        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {e:?}");
        })?;

        Ok(r)
    }
}

impl Backend {
    pub async fn find_user_by_email(&self, email: &str) -> std::result::Result<User, FindError> {
        sqlx::query_as::<_, User>(
            "
            SELECT id, email, pwhash, created_at, last_login_at
            FROM users
            WHERE email = ?
            ",
        )
        .bind(email)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't look up user by email: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn find_user_by_id(&self, id: &str) -> std::result::Result<User, FindError> {
        sqlx::query_as::<_, User>(
            "
            SELECT id, email, pwhash, created_at, last_login_at
            FROM users
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't look up user by id: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn insert_user(&self, user: &User) -> std::result::Result<(), InsertError> {
        sqlx::query(
            "
            INSERT INTO users
            (id, email, pwhash, created_at, last_login_at)
            VALUES
            (?, ?, ?, ?, ?)
            ",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.pwhash)
        .bind(user.created_at)
        .bind(user.last_login_at)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            // the UNIQUE(email) constraint backstops the pre-insert existence check
            let duplicate = e
                .as_database_error()
                .map_or(false, |db| db.message().contains("UNIQUE"));

            if duplicate {
                InsertError::Duplicate
            } else {
                error!("error inserting user: {e:?}");
                InsertError::Internal
            }
        })
    }

    pub async fn touch_last_login(&self, user_id: &str, now: Timestamp) -> Result<()> {
        sqlx::query(
            "
            UPDATE users
            SET last_login_at = ?
            WHERE id = ?
            ",
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("error updating last login: {e:?}");
        })
    }
}

impl Backend {
    pub async fn questions(&self, category: Category) -> Result<Vec<QuestionRow>> {
        sqlx::query_as::<_, QuestionRow>(
            "
            SELECT id, title, code, options, correct_index, explanation
            FROM questions
            WHERE category = ?
            ORDER BY rowid
            ",
        )
        .bind(category.slug())
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting questions: {e:?}");
        })
    }

    pub async fn unseen_questions(
        &self,
        user_id: &str,
        category: Category,
    ) -> Result<Vec<QuestionRow>> {
        sqlx::query_as::<_, QuestionRow>(
            "
            SELECT id, title, code, options, correct_index, explanation
            FROM questions
            WHERE category = ?
                AND id NOT IN (
                    SELECT question_id
                    FROM progress
                    WHERE user_id = ? AND category = ?
                )
            ORDER BY rowid
            ",
        )
        .bind(category.slug())
        .bind(user_id)
        .bind(category.slug())
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting unseen questions: {e:?}");
        })
    }

    /// Idempotent: duplicate marks are swallowed by the primary key,
    /// so concurrent requests can't create duplicate rows.
    pub async fn mark_correct(
        &self,
        user_id: &str,
        category: Category,
        question_id: &str,
        now: Timestamp,
    ) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO progress
            (user_id, category, question_id, marked_at)
            VALUES
            (?, ?, ?, ?)
            ON CONFLICT
            DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(category.slug())
        .bind(question_id)
        .bind(now)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("error inserting progress: {e:?}");
        })
    }

    pub async fn progress(&self, user_id: &str) -> Result<Vec<ProgressRow>> {
        sqlx::query_as::<_, ProgressRow>(
            "
            SELECT category, question_id
            FROM progress
            WHERE user_id = ?
            ORDER BY rowid
            ",
        )
        .bind(user_id)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("couldn't query progress for user {user_id}: {e:?}");
        })
    }
}

impl Backend {
    /// Idempotent import: inserts only when the category has no questions yet.
    pub async fn seed_questions(&self, category: Category, questions: &[Question]) -> Result<()> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM questions WHERE category = ?")
                .bind(category.slug())
                .fetch_one(&self.0)
                .await
                .map_err(|e| {
                    error!("error counting questions: {e:?}");
                })?;

        if count > 0 {
            info!("{category} already seeded, {count} questions");
            return Ok(());
        }

        self.transact(|mut tx| async move {
            for question in questions {
                let options = serde_json::to_string(&question.options).map_err(|e| {
                    error!("couldn't encode options for {}: {e}", question.id);
                })?;

                sqlx::query(
                    "
                    INSERT INTO questions
                    (category, id, title, code, options, correct_index, explanation)
                    VALUES
                    (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT
                    DO NOTHING
                    ",
                )
                .bind(category.slug())
                .bind(&question.id)
                .bind(&question.title)
                .bind(&question.code)
                .bind(options)
                .bind(question.correct_index)
                .bind(&question.explanation)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("error inserting question: {e:?}");
                })?;
            }

            Ok((tx, ()))
        })
        .await?;

        info!("{category} seeded with {} questions", questions.len());

        Ok(())
    }
}

#[cfg(test)]
pub mod test {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::Backend;

    pub async fn create_backend() -> Backend {
        // a single connection, so every query sees the same in-memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        Backend(pool)
    }
}
