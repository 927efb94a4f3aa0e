mod eligibility;

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    str::FromStr,
};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    clock::{self, SharedClock},
    error::ChatError,
};

pub use eligibility::{Participant, eligible};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
    Family,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Admin => "admin",
            Employee => "employee",
            Family => "family",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "employee" => Ok(Role::Employee),
            "family" => Ok(Role::Family),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

type UserRow = (String, String, String, String, bool, i64);

const USER_COLUMNS: &str = "id,username,display_name,role,is_active,created_at";

fn user_from_row((id, username, display_name, role, is_active, created_at): UserRow) -> Result<User, sqlx::Error> {
    let role = role.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(User { id, username, display_name, role, is_active, created_at: clock::from_millis(created_at) })
}

/// Users, roles and patient links. Everything chat eligibility is derived from.
#[derive(Clone)]
pub struct Directory {
    db_pool: SqlitePool,
    clock: SharedClock,
}

impl Directory {
    pub fn new(db_pool: SqlitePool, clock: SharedClock) -> Self {
        Self { db_pool, clock }
    }

    pub async fn create_user(&self, new_user: NewUser) -> Result<User, ChatError> {
        let id = Uuid::now_v7().to_string();
        let password_hash = hash_password(&new_user.password)?;
        let created_at = clock::to_millis(self.clock.now());

        sqlx::query("INSERT INTO users (id,username,password_hash,role,display_name,is_active,created_at) VALUES (?,?,?,?,?,1,?)")
            .bind(&id)
            .bind(&new_user.username)
            .bind(&password_hash)
            .bind(new_user.role.as_str())
            .bind(&new_user.display_name)
            .bind(created_at)
            .execute(&self.db_pool)
            .await?;

        tracing::info!(user_id = %id, role = %new_user.role, "user created");

        Ok(User {
            id,
            username: new_user.username,
            display_name: new_user.display_name,
            role: new_user.role,
            is_active: true,
            created_at: clock::from_millis(created_at),
        })
    }

    pub async fn link_family(&self, user_id: &str, patient_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO family_members (user_id,patient_id) VALUES (?,?)")
            .bind(user_id)
            .bind(patient_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn assign_employee(&self, user_id: &str, patient_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO employee_assignments (user_id,patient_id) VALUES (?,?)")
            .bind(user_id)
            .bind(patient_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn deactivate(&self, user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_active=0 WHERE id=?")
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn user(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=?"))
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    pub async fn active_user(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        Ok(self.user(user_id).await?.filter(|user| user.is_active))
    }

    pub async fn participant(&self, user_id: &str) -> Result<Option<Participant>, sqlx::Error> {
        let Some(user) = self.active_user(user_id).await? else {
            return Ok(None);
        };

        let patients: Vec<(String,)> = match user.role {
            Role::Admin => Vec::new(),
            Role::Family => {
                sqlx::query_as("SELECT patient_id FROM family_members WHERE user_id=?")
                    .bind(&user.id)
                    .fetch_all(&self.db_pool)
                    .await?
            }
            Role::Employee => {
                sqlx::query_as("SELECT patient_id FROM employee_assignments WHERE user_id=?")
                    .bind(&user.id)
                    .fetch_all(&self.db_pool)
                    .await?
            }
        };

        Ok(Some(
            Participant::new(user.id, user.role).with_patients(patients.into_iter().map(|(p,)| p)),
        ))
    }

    /// Unknown and inactive users are never eligible.
    pub async fn are_eligible(&self, a: &str, b: &str) -> Result<bool, sqlx::Error> {
        let (Some(a), Some(b)) = (self.participant(a).await?, self.participant(b).await?) else {
            return Ok(false);
        };
        Ok(eligible(&a, &b))
    }

    /// Every active user `user_id` may chat with, by display name.
    pub async fn peers(&self, user_id: &str) -> Result<Vec<User>, sqlx::Error> {
        let Some(me) = self.participant(user_id).await? else {
            return Ok(Vec::new());
        };

        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active=1 AND id<>? ORDER BY display_name"
        ))
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;

        let family_links = self.links("SELECT user_id,patient_id FROM family_members").await?;
        let employee_links = self.links("SELECT user_id,patient_id FROM employee_assignments").await?;
        let no_patients = BTreeSet::new();

        let mut peers = Vec::new();
        for row in rows {
            let user = user_from_row(row)?;
            let links = match user.role {
                Role::Admin => &no_patients,
                Role::Family => family_links.get(&user.id).unwrap_or(&no_patients),
                Role::Employee => employee_links.get(&user.id).unwrap_or(&no_patients),
            };
            let other = Participant::new(user.id.clone(), user.role).with_patients(links.iter().cloned());
            if eligible(&me, &other) {
                peers.push(user);
            }
        }
        Ok(peers)
    }

    async fn links(&self, query: &str) -> Result<HashMap<String, BTreeSet<String>>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(query).fetch_all(&self.db_pool).await?;

        let mut links: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (user_id, patient_id) in rows {
            links.entry(user_id).or_default().insert(patient_id);
        }
        Ok(links)
    }

    /// Returns the user when the password matches an active account.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, ChatError> {
        let row: Option<(String, String)> = sqlx::query_as("SELECT id,password_hash FROM users WHERE username=?")
            .bind(username)
            .fetch_optional(&self.db_pool)
            .await?;

        let Some((user_id, password_hash)) = row else {
            return Ok(None);
        };
        if !verify_password(password, &password_hash)? {
            return Ok(None);
        }

        Ok(self.active_user(&user_id).await?)
    }
}

fn hash_password(password: &str) -> Result<String, ChatError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ChatError::Credential(e.to_string()))
}

fn verify_password(password: &str, password_hash: &str) -> Result<bool, ChatError> {
    let parsed = PasswordHash::new(password_hash).map_err(|e| ChatError::Credential(e.to_string()))?;
    Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}
