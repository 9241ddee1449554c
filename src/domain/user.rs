//! Signed-in user profile
//!
//! Owned by the identity/profile provider. The core reads `email`
//! (ownership key) and `university` (visibility key) only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub university: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl User {
    pub fn new(uid: &str, name: &str, email: &str, university: &str) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            avatar: "https://placehold.co/100x100.png".to_string(),
            university: university.to_string(),
            phone: None,
        }
    }
}
