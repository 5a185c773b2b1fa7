use crate::error::ModelError;
use crate::visibility::Authorizations;

/// Caller capability handed to every read.
///
/// The reference backend issues [`ModelUserContext::Unrestricted`]; the
/// column-store backend only accepts a label set and rejects the unrestricted
/// token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelUserContext {
    Unrestricted,
    Labels(Authorizations),
}

impl ModelUserContext {
    /// Label context from a list of labels. `[""]` yields an empty label set.
    pub fn labels<I, S>(labels: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(ModelUserContext::Labels(Authorizations::new(labels)?))
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, ModelUserContext::Unrestricted)
    }

    pub(crate) fn authorizations(&self) -> Option<&Authorizations> {
        match self {
            ModelUserContext::Unrestricted => None,
            ModelUserContext::Labels(auths) => Some(auths),
        }
    }

    pub(crate) fn require_labels(&self) -> Result<&Authorizations, ModelError> {
        self.authorizations().ok_or_else(|| {
            ModelError::PermissionDenied(
                "column store sessions require a label-based user context".into(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ModelUserContext;

    #[test]
    fn unrestricted_context_is_rejected_where_labels_are_required() {
        let err = ModelUserContext::Unrestricted
            .require_labels()
            .expect_err("unrestricted");
        assert_eq!(err.code_str(), "permission_denied");
    }

    #[test]
    fn label_context_exposes_its_authorizations() {
        let ctx = ModelUserContext::labels(["A", "B"]).expect("labels");
        let auths = ctx.require_labels().expect("labels");
        assert!(auths.contains("A") && auths.contains("B"));
        assert!(!ctx.is_unrestricted());
    }
}
