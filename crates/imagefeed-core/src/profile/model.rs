use serde::{Deserialize, Serialize};

/// The signed-in user as shown on the profile screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub username: String,
    pub name: String,
    pub login_name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileResult {
    username: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    bio: Option<String>,
}

impl From<ProfileResult> for Profile {
    fn from(result: ProfileResult) -> Self {
        let name = [result.first_name, result.last_name]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            login_name: format!("@{}", result.username),
            username: result.username,
            name,
            bio: result.bio,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserResult {
    pub(crate) profile_image: ProfileImage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProfileImage {
    pub(crate) small: String,
}
