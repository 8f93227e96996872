use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub(crate) struct LocalUser {
    pub subject_id: String,
    pub identifier: String,
    pub password_hash: String,
    /// Set while the account holds a temporary secret.
    pub temporary: bool,
    pub attributes: HashMap<String, String>,
    pub groups: BTreeSet<String>,
}

/// Account to seed into a `LocalIdentityProvider`.
#[derive(Clone)]
pub struct NewUser {
    pub(crate) identifier: String,
    pub(crate) secret: String,
    pub(crate) temporary: bool,
    pub(crate) attributes: HashMap<String, String>,
    pub(crate) groups: BTreeSet<String>,
}

impl NewUser {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
            temporary: false,
            attributes: HashMap::new(),
            groups: BTreeSet::new(),
        }
    }

    /// The first sign-in will demand a new secret.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Set a raw attribute, e.g. `custom:currentAgency`.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn email(self, email: impl Into<String>) -> Self {
        self.attribute("email", email)
    }

    pub fn display_name(self, name: impl Into<String>) -> Self {
        self.attribute("name", name)
    }

    pub fn agency(self, agency_id: impl Into<String>) -> Self {
        self.attribute("custom:currentAgency", agency_id)
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("identifier", &self.identifier)
            .field("temporary", &self.temporary)
            .field("attributes", &self.attributes)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}
