//! PostgreSQL store for the access-control core.
//!
//! Uniqueness and referential rules live in the schema
//! (`migrations/`); violations are translated by [`map_db_error`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::pagination::PageRequest;
use sqlx::postgres::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use super::error::map_db_error;
use super::store::{like_pattern, PrincipalStore, RegistryStore, SessionStore};
use crate::models::{
    Endpoint, NewPrincipal, Permission, Principal, PrincipalWithGrant, Role, RoleUpdate, Session,
    UserRole,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PrincipalStore for Database {
    async fn insert_principal(&self, principal: &NewPrincipal) -> Result<Principal, AppError> {
        sqlx::query_as::<_, Principal>(
            r#"
            INSERT INTO principals (email, display_name, external_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&principal.email)
        .bind(&principal.display_name)
        .bind(&principal.external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Principal"))
    }

    async fn find_principal_by_id(&self, principal_id: i64) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE principal_id = $1")
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_principal_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn search_principals(
        &self,
        search: Option<&str>,
        admin_role_name: &str,
        page: PageRequest,
    ) -> Result<(Vec<PrincipalWithGrant>, u64), AppError> {
        let pattern = search.map(like_pattern);

        let rows = sqlx::query_as::<_, PrincipalWithGrant>(
            r#"
            SELECT p.principal_id, p.email, p.display_name, p.created_utc,
                   (ur.role_id IS NOT NULL) AS is_admin,
                   ur.granted_by AS admin_granted_by,
                   ur.granted_utc AS admin_granted_utc
            FROM principals p
            LEFT JOIN user_roles ur
                ON ur.principal_id = p.principal_id
               AND ur.role_id = (SELECT role_id FROM roles WHERE role_name = $1)
            WHERE ($2::TEXT IS NULL OR p.email ILIKE $2 OR p.display_name ILIKE $2)
            ORDER BY p.created_utc DESC, p.principal_id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(admin_role_name)
        .bind(&pattern)
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM principals p
            WHERE ($1::TEXT IS NULL OR p.email ILIKE $1 OR p.display_name ILIKE $1)
            "#,
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok((rows, total.max(0) as u64))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for Database {
    // ==================== Role Operations ====================

    async fn list_roles(&self) -> Result<Vec<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY role_name")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_role_by_id(&self, role_id: i64) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_role_by_name(&self, role_name: &str) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE role_name = $1")
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn insert_role(
        &self,
        role_name: &str,
        description: Option<&str>,
        preset: bool,
    ) -> Result<Role, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (role_name, description, preset_flag)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(role_name)
        .bind(description)
        .bind(preset)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Role"))
    }

    async fn update_role(&self, role_id: i64, update: &RoleUpdate) -> Result<Option<Role>, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET role_name = COALESCE($2, role_name),
                description = COALESCE($3, description)
            WHERE role_id = $1
            RETURNING *
            "#,
        )
        .bind(role_id)
        .bind(&update.role_name)
        .bind(&update.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Role"))
    }

    async fn delete_role(&self, role_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Permission Operations ====================

    async fn list_permissions(&self) -> Result<Vec<Permission>, AppError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions ORDER BY resource, action")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_permission_by_id(
        &self,
        permission_id: i64,
    ) -> Result<Option<Permission>, AppError> {
        sqlx::query_as::<_, Permission>("SELECT * FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, AppError> {
        sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE resource = $1 AND action = $2",
        )
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn insert_permission(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Permission, AppError> {
        sqlx::query_as::<_, Permission>(
            "INSERT INTO permissions (resource, action) VALUES ($1, $2) RETURNING *",
        )
        .bind(resource)
        .bind(action)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Permission"))
    }

    async fn delete_permission(&self, permission_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM permissions WHERE permission_id = $1")
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Endpoint Operations ====================

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>, AppError> {
        sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints ORDER BY path_pattern, method")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn list_endpoints_by_method(&self, method: &str) -> Result<Vec<Endpoint>, AppError> {
        sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE method = $1")
            .bind(method)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_endpoint_by_id(&self, endpoint_id: i64) -> Result<Option<Endpoint>, AppError> {
        sqlx::query_as::<_, Endpoint>("SELECT * FROM endpoints WHERE endpoint_id = $1")
            .bind(endpoint_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_endpoint(
        &self,
        path_pattern: &str,
        method: &str,
    ) -> Result<Option<Endpoint>, AppError> {
        sqlx::query_as::<_, Endpoint>(
            "SELECT * FROM endpoints WHERE path_pattern = $1 AND method = $2",
        )
        .bind(path_pattern)
        .bind(method)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn insert_endpoint(
        &self,
        path_pattern: &str,
        method: &str,
    ) -> Result<Endpoint, AppError> {
        sqlx::query_as::<_, Endpoint>(
            "INSERT INTO endpoints (path_pattern, method) VALUES ($1, $2) RETURNING *",
        )
        .bind(path_pattern)
        .bind(method)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Endpoint"))
    }

    async fn delete_endpoint(&self, endpoint_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM endpoints WHERE endpoint_id = $1")
            .bind(endpoint_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== Role Permission Operations ====================

    async fn role_permission_ids(&self, role_id: i64) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT permission_id FROM role_permissions WHERE role_id = $1 ORDER BY permission_id",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn add_role_permission(&self, role_id: i64, permission_id: i64) -> Result<(), AppError> {
        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Role permission"))?;
        Ok(())
    }

    async fn apply_role_permission_changes(
        &self,
        role_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = ANY($2)")
            .bind(role_id)
            .bind(remove)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(add)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "Role permission"))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== Endpoint Permission Operations ====================

    async fn endpoint_permission_ids(&self, endpoint_id: i64) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT permission_id FROM endpoint_permissions WHERE endpoint_id = $1 ORDER BY permission_id",
        )
        .bind(endpoint_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn add_endpoint_permission(
        &self,
        endpoint_id: i64,
        permission_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO endpoint_permissions (endpoint_id, permission_id) VALUES ($1, $2)")
            .bind(endpoint_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, "Endpoint permission"))?;
        Ok(())
    }

    async fn apply_endpoint_permission_changes(
        &self,
        endpoint_id: i64,
        add: &[i64],
        remove: &[i64],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            "DELETE FROM endpoint_permissions WHERE endpoint_id = $1 AND permission_id = ANY($2)",
        )
        .bind(endpoint_id)
        .bind(remove)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO endpoint_permissions (endpoint_id, permission_id)
            SELECT $1, UNNEST($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(endpoint_id)
        .bind(add)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error(e, "Endpoint permission"))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    // ==================== User Role Operations ====================

    async fn insert_user_role(&self, grant: &UserRole) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (principal_id, role_id, granted_by, granted_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(grant.principal_id)
        .bind(grant.role_id)
        .bind(grant.granted_by)
        .bind(grant.granted_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Role grant"))?;
        Ok(())
    }

    async fn find_user_role(
        &self,
        principal_id: i64,
        role_id: i64,
    ) -> Result<Option<UserRole>, AppError> {
        sqlx::query_as::<_, UserRole>(
            "SELECT * FROM user_roles WHERE principal_id = $1 AND role_id = $2",
        )
        .bind(principal_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn delete_user_role(&self, principal_id: i64, role_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM user_roles WHERE principal_id = $1 AND role_id = $2")
            .bind(principal_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_roles(&self, principal_id: i64) -> Result<Vec<UserRole>, AppError> {
        sqlx::query_as::<_, UserRole>(
            "SELECT * FROM user_roles WHERE principal_id = $1 ORDER BY granted_utc",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn principal_permission_ids(&self, principal_id: i64) -> Result<HashSet<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT rp.permission_id
            FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            WHERE ur.principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(&self, session: &Session) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, principal_id, token_hash_text, expiry_utc, ip_address, user_agent, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.session_id)
        .bind(session.principal_id)
        .bind(&session.token_hash_text)
        .bind(session.expiry_utc)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "Session"))?;
        Ok(())
    }

    async fn find_session_by_id(&self, session_id: Uuid) -> Result<Option<Session>, AppError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash_text = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn find_sessions_by_principal(
        &self,
        principal_id: i64,
    ) -> Result<Vec<Session>, AppError> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE principal_id = $1 ORDER BY created_utc DESC",
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_expired_before(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expiry_utc < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }
}
