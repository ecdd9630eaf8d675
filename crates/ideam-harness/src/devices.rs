use hashbrown::DefaultHashBuilder;

use indexmap::set::{IndexSet, IntoIter, Iter};

use ideam::entity::EntityId;

use ideam_client::error::{Error, ErrorKind, Result};

/// Default prefix of numbered device identifiers.
pub const DEFAULT_PREFIX: &str = "device";

/// An ordered set of device identifiers.
///
/// A device appears at most once, so that no two workers of the same run can
/// act on the same identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Devices(IndexSet<EntityId, DefaultHashBuilder>);

impl Default for Devices {
    fn default() -> Self {
        Self::empty()
    }
}

impl Devices {
    /// Creates an empty set of [`Devices`].
    #[must_use]
    pub fn empty() -> Self {
        Self(IndexSet::with_hasher(DefaultHashBuilder::default()))
    }

    /// Creates `count` devices named `{prefix}0` … `{prefix}{count - 1}`.
    ///
    /// # Errors
    ///
    /// The prefix produces invalid identifiers.
    pub fn numbered(prefix: &str, count: usize) -> Result<Self> {
        Self::from_names((0..count).map(|i| format!("{prefix}{i}")))
    }

    /// Creates [`Devices`] from a sequence of names.
    ///
    /// # Errors
    ///
    /// A name is not a valid identifier or appears more than once.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut devices = Self::empty();
        for name in names {
            let id = EntityId::new(name)?;
            if devices.0.contains(&id) {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("Device `{id}` appears more than once"),
                ));
            }
            let _ = devices.0.insert(id);
        }
        Ok(devices)
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no devices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the given device belongs to the set.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.0.contains(id)
    }

    /// Returns an iterator over the devices, in insertion order.
    pub fn iter(&self) -> Iter<'_, EntityId> {
        self.0.iter()
    }
}

impl IntoIterator for Devices {
    type Item = EntityId;
    type IntoIter = IntoIter<EntityId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Devices {
    type Item = &'a EntityId;
    type IntoIter = Iter<'a, EntityId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
