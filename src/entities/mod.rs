// Entity Models
//
// Every entity is keyed by its SQLite surrogate id. Mutating functions take a
// `&Transaction` so the caller decides the commit boundary; reads accept any
// `&Connection` (a transaction derefs to one).

pub mod catalog;
pub mod student;
pub mod punishment;
pub mod activity;

pub use catalog::{Class, Grade, PunishmentType, ReferenceTable};
pub use student::{Student, StudentDeletion, StudentIdentity};
pub use punishment::{NewPunishment, Punishment, PunishmentDeletion, PunishmentEdit, PunishmentStatus};
pub use activity::{Activity, ActivityInput};
