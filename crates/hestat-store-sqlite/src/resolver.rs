//! The SQLite-backed institution resolver.
//!
//! [`InstitutionResolver`] owns an in-memory memo of alias and code
//! lookups behind a mutex. Resolving a file happens through a [`Staging`]
//! bound to that file's transaction: new institutions and aliases are
//! written inside the transaction and recorded in the staging area, and
//! only [`AliasCache::absorb`]ed into the memo after the commit. A rolled
//! back file therefore never leaves the memo pointing at rows that do not
//! exist.

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use hestat_core::{
  Error as CoreError,
  institution::{InstitutionId, InstitutionName, NewInstitution, alias_key},
  resolve::{InstitutionHint, ResolveInstitution},
};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::Result;

// ─── Cache ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct AliasCache {
  aliases: HashMap<String, InstitutionId>,
  codes:   HashMap<String, InstitutionId>,
}

impl AliasCache {
  /// Merge a committed file's staged lookups.
  pub fn absorb(&mut self, staged: AliasCache) {
    self.aliases.extend(staged.aliases);
    self.codes.extend(staged.codes);
  }

  pub fn set_alias(&mut self, alias: String, id: InstitutionId) { self.aliases.insert(alias, id); }

  /// Forget every code that pointed at `id` and remember `code` instead.
  pub fn set_code(&mut self, id: InstitutionId, code: String) {
    self.codes.retain(|_, v| *v != id);
    self.codes.insert(code, id);
  }

  fn alias(&self, key: &str) -> Option<InstitutionId> { self.aliases.get(key).copied() }

  fn code(&self, code: &str) -> Option<InstitutionId> { self.codes.get(code).copied() }
}

/// Resolver state shared by every load on one store.
#[derive(Debug, Default)]
pub struct InstitutionResolver {
  known: Mutex<AliasCache>,
}

impl InstitutionResolver {
  pub fn new() -> Self { Self::default() }

  /// Lock the memo. Held for a whole file's resolution and write.
  pub fn lock(&self) -> MutexGuard<'_, AliasCache> {
    self.known.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

// ─── Staging ─────────────────────────────────────────────────────────────────

/// Per-file resolver bound to one open transaction.
pub struct Staging<'a> {
  conn:   &'a Connection,
  known:  &'a AliasCache,
  staged: AliasCache,
  /// Institutions created while resolving this file.
  created: u64,
}

impl<'a> Staging<'a> {
  pub fn new(conn: &'a Connection, known: &'a AliasCache) -> Self {
    Self { conn, known, staged: AliasCache::default(), created: 0 }
  }

  pub fn created(&self) -> u64 { self.created }

  /// The lookups made while resolving, ready to be absorbed after commit.
  pub fn into_staged(self) -> AliasCache { self.staged }

  fn cached_alias(&self, key: &str) -> Option<InstitutionId> {
    self.staged.alias(key).or_else(|| self.known.alias(key))
  }

  fn cached_code(&self, code: &str) -> Option<InstitutionId> {
    self.staged.code(code).or_else(|| self.known.code(code))
  }

  fn lookup_alias(&mut self, key: &str) -> Result<Option<InstitutionId>, CoreError> {
    if let Some(id) = self.cached_alias(key) {
      return Ok(Some(id));
    }
    let found = alias_target(self.conn, key).map_err(backend)?;
    if let Some(id) = found {
      self.staged.set_alias(key.to_owned(), id);
    }
    Ok(found)
  }

  fn by_code(
    &mut self,
    code: &str,
    name: &InstitutionName,
    hint: &InstitutionHint<'_>,
  ) -> Result<InstitutionId, CoreError> {
    if let Some(id) = self.cached_code(code) {
      return Ok(id);
    }
    let existing = self
      .conn
      .query_row("SELECT id FROM institutions WHERE code = ?1", params![code], |r| r.get(0))
      .optional()
      .map_err(backend)?;
    let id = match existing {
      Some(id) => InstitutionId(id),
      None => {
        let id = insert_institution(self.conn, &NewInstitution {
          code:          code.to_owned(),
          name:          name.display.clone(),
          state:         hint.state.map(str::to_owned),
          provider_type: hint.provider_category.map(str::to_owned),
        })
        .map_err(backend)?;
        self.created += 1;
        tracing::info!(%id, code, name = %name.display, "new institution");
        id
      }
    };
    self.staged.codes.insert(code.to_owned(), id);
    Ok(id)
  }

  /// Register `key → id` unless the alias already exists. An alias that
  /// points elsewhere is left untouched.
  fn learn_alias(&mut self, key: &str, id: InstitutionId) -> Result<(), CoreError> {
    match self.lookup_alias(key)? {
      Some(existing) if existing == id => {}
      Some(existing) => {
        tracing::warn!(
          alias = key,
          %existing,
          wanted = %id,
          "alias already maps elsewhere; left untouched",
        );
      }
      None => {
        self
          .conn
          .execute(
            "INSERT INTO institution_aliases (alias, institution_id) VALUES (?1, ?2)",
            params![key, id.0],
          )
          .map_err(backend)?;
        tracing::debug!(alias = key, %id, "new alias");
        self.staged.set_alias(key.to_owned(), id);
      }
    }
    Ok(())
  }
}

impl ResolveInstitution for Staging<'_> {
  fn resolve(
    &mut self,
    raw: &str,
    hint: &InstitutionHint<'_>,
  ) -> hestat_core::Result<InstitutionId> {
    let name =
      InstitutionName::parse(raw).ok_or_else(|| CoreError::UnresolvedInstitution(raw.to_owned()))?;

    match name.code.as_deref() {
      Some(code) => {
        let id = self.by_code(code, &name, hint)?;
        self.learn_alias(&name.alias_key, id)?;
        Ok(id)
      }
      None => self
        .lookup_alias(&name.alias_key)?
        .ok_or_else(|| CoreError::UnresolvedInstitution(raw.to_owned())),
    }
  }
}

// ─── Shared SQL ──────────────────────────────────────────────────────────────

fn backend(e: rusqlite::Error) -> CoreError { CoreError::Backend(Box::new(e)) }

pub fn alias_target(conn: &Connection, key: &str) -> rusqlite::Result<Option<InstitutionId>> {
  conn
    .query_row(
      "SELECT institution_id FROM institution_aliases WHERE alias = ?1",
      params![key],
      |r| r.get(0).map(InstitutionId),
    )
    .optional()
}

pub fn insert_institution(
  conn: &Connection,
  new: &NewInstitution,
) -> rusqlite::Result<InstitutionId> {
  conn.execute(
    "INSERT INTO institutions (code, name, state, provider_type) VALUES (?1, ?2, ?3, ?4)",
    params![new.code, new.name, new.state, new.provider_type],
  )?;
  Ok(InstitutionId(conn.last_insert_rowid()))
}

pub fn institution_exists(conn: &Connection, id: InstitutionId) -> rusqlite::Result<bool> {
  conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM institutions WHERE id = ?1)",
    params![id.0],
    |r| r.get(0),
  )
}

// ─── Operator operations ─────────────────────────────────────────────────────

/// Point `alias` at `id`. An alias already mapped to another institution
/// is only re-pointed with `override_existing`.
pub fn register_alias(
  conn: &Connection,
  cache: &mut AliasCache,
  alias: &str,
  id: InstitutionId,
  override_existing: bool,
) -> Result<()> {
  let key = alias_key(alias);
  if key.is_empty() {
    return Err(CoreError::UnresolvedInstitution(alias.to_owned()).into());
  }
  if !institution_exists(conn, id)? {
    return Err(CoreError::IntegrityViolation(format!("no institution {id}")).into());
  }
  if let Some(existing) = alias_target(conn, &key)? {
    if existing != id && !override_existing {
      return Err(CoreError::AliasConflict { alias: key, existing }.into());
    }
    if existing != id {
      tracing::warn!(alias = %key, from = %existing, to = %id, "alias re-pointed by operator");
    }
  }
  conn.execute(
    "INSERT INTO institution_aliases (alias, institution_id) VALUES (?1, ?2)
     ON CONFLICT(alias) DO UPDATE SET institution_id = excluded.institution_id",
    params![key, id.0],
  )?;
  cache.set_alias(key, id);
  Ok(())
}

/// Record a government code reissue for an existing institution.
pub fn reissue_code(
  conn: &Connection,
  cache: &mut AliasCache,
  id: InstitutionId,
  code: &str,
) -> Result<()> {
  let code = code.trim();
  if code.is_empty() {
    return Err(CoreError::IntegrityViolation("empty institution code".into()).into());
  }
  let holder: Option<i64> = conn
    .query_row("SELECT id FROM institutions WHERE code = ?1", params![code], |r| r.get(0))
    .optional()?;
  if let Some(holder) = holder.filter(|h| *h != id.0) {
    return Err(
      CoreError::IntegrityViolation(format!("code {code} already belongs to institution {holder}"))
        .into(),
    );
  }
  let changed =
    conn.execute("UPDATE institutions SET code = ?1 WHERE id = ?2", params![code, id.0])?;
  if changed == 0 {
    return Err(CoreError::IntegrityViolation(format!("no institution {id}")).into());
  }
  tracing::info!(%id, code, "institution code reissued");
  cache.set_code(id, code.to_owned());
  Ok(())
}

/// Create an institution for `new.code`, or return the one that already
/// holds it.
pub fn ensure_institution(
  conn: &Connection,
  cache: &mut AliasCache,
  new: &NewInstitution,
) -> Result<InstitutionId> {
  let existing: Option<i64> = conn
    .query_row("SELECT id FROM institutions WHERE code = ?1", params![new.code], |r| r.get(0))
    .optional()?;
  let id = match existing {
    Some(id) => InstitutionId(id),
    None => insert_institution(conn, new)?,
  };
  let key = alias_key(&new.name);
  if !key.is_empty() && alias_target(conn, &key)?.is_none() {
    conn.execute(
      "INSERT INTO institution_aliases (alias, institution_id) VALUES (?1, ?2)",
      params![key, id.0],
    )?;
    cache.set_alias(key, id);
  }
  cache.set_code(id, new.code.clone());
  Ok(id)
}
