//! The seam between the sheet parser and institution identity.
//!
//! The parser never decides what an institution *is*; it hands every name
//! cell to a [`ResolveInstitution`] implementation together with whatever
//! the surrounding rows revealed about it.

use crate::{Result, institution::InstitutionId};

/// Context the parser gathered around an institution cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstitutionHint<'a> {
  /// State or territory printed in a neighbouring column or carried
  /// forward from the previous row.
  pub state:             Option<&'a str>,
  /// Provider category from the nearest group heading above the row.
  pub provider_category: Option<&'a str>,
}

/// Maps a raw institution cell to a canonical identifier.
///
/// Implementations may create institutions and register aliases as a side
/// effect; they must never re-point an existing alias.
pub trait ResolveInstitution {
  fn resolve(&mut self, raw: &str, hint: &InstitutionHint<'_>) -> Result<InstitutionId>;
}

impl<R: ResolveInstitution + ?Sized> ResolveInstitution for &mut R {
  fn resolve(&mut self, raw: &str, hint: &InstitutionHint<'_>) -> Result<InstitutionId> {
    (**self).resolve(raw, hint)
  }
}
