pub mod course;
pub mod profile;
pub mod purchase;

pub use course::Entity as Course;
pub use profile::Entity as Profile;
pub use purchase::Entity as Purchase;
