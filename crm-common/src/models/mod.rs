//! Domain models shared by the store and the engine

/// Declares a classification label enum with its wire spelling and canonical order
macro_rules! label_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            /// All labels in dashboard display order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(crate::Error::InvalidInput(format!(
                        "unknown {} label: {:?}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod activity;
pub mod customer;
pub mod note;
pub mod profile;
pub mod source;

pub use activity::{ActivityDomain, ActivityRecord, SourceRef};
pub use customer::{
    Axis, Channel, Classification, ConversationMetrics, CustomerMetrics, JourneyStage,
    LifecycleStage, LoyaltyStage, MergeMethod, MomentumStage, OrderMetrics, Source, SourceIds,
    UnifiedCustomer, ValueTier,
};
pub use note::{Note, NoteInput};
pub use profile::CustomerProfile;
pub use source::{
    ChangeOperation, ConversationRecord, MessagingCustomerRecord, OrderRecord, OrderSource,
    PosCustomerRecord, SourceCollection,
};
