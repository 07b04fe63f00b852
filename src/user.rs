use crate::time::Timestamp;

#[derive(Debug, Clone)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub pwhash: String,
    pub created_at: Timestamp,
    pub last_login_at: Timestamp,
}
