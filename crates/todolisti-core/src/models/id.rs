//! UUID-backed identifier newtypes

/// Declares a `Uuid` newtype with parsing, display, and serde support.
///
/// New ids are UUID v7 (time-sortable). Ids arriving from clients are parsed
/// with [`std::str::FromStr`] so any UUID version is accepted.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Wrap an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s.trim())?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a user account
    UserId
);
uuid_id!(
    /// Identifier of a task
    TaskId
);
uuid_id!(
    /// Identifier of a project
    ProjectId
);
uuid_id!(
    /// Identifier of a tag
    TagId
);
uuid_id!(
    /// Identifier of a delegated permission grant
    PermissionId
);
uuid_id!(
    /// Identifier of a permission invitation
    InvitationId
);
uuid_id!(
    /// Identifier of a durable sync queue entry
    SyncQueueId
);
uuid_id!(
    /// Identifier of an audit log entry
    AuditLogId
);
