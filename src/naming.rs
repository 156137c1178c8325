//! Tenant naming: container name derivation and team-name sanitization.

/// Prefix shared by every managed container name.
pub const CONTAINER_PREFIX: &str = "webshell-";

/// Substituted when a team name sanitizes down to nothing.
pub const FALLBACK_TEAM_NAME: &str = "team";

pub const LABEL_TEAM: &str = "webshell.team";
pub const LABEL_USERNAME: &str = "webshell.username";
pub const LABEL_CREATED: &str = "webshell.created";
pub const LABEL_EXPIRES: &str = "webshell.expires";

/// Maximum length of a sanitized team identifier.
const MAX_TEAM_LEN: usize = 50;

/// Derive the container name for a sanitized team identifier.
pub fn container_name(team: &str) -> String {
    format!("{CONTAINER_PREFIX}{team}")
}

/// Normalize a free-form team name into a safe container identifier.
///
/// Lowercases the input, maps every character outside `[a-z0-9-]` to `-`,
/// collapses hyphen runs, strips leading/trailing hyphens and caps the
/// result at 50 characters. An input that sanitizes to nothing yields
/// [`FALLBACK_TEAM_NAME`].
///
/// The mapping is deterministic but not injective: two distinct team names
/// can normalize to the same identifier and will then share one container.
/// Nothing here (or anywhere else in the service) detects that case; the
/// runtime only ever sees the sanitized form.
pub fn sanitize_team_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_hyphen = false;
    for c in raw.to_lowercase().chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if !prev_hyphen {
                out.push('-');
                prev_hyphen = true;
            }
        } else {
            out.push(mapped);
            prev_hyphen = false;
        }
    }

    let trimmed = out.trim_matches('-');
    let capped: String = trimmed.chars().take(MAX_TEAM_LEN).collect();
    // Truncation can expose a new trailing hyphen.
    let capped = capped.trim_end_matches('-');

    if capped.is_empty() {
        FALLBACK_TEAM_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Check a requesting username against the allowed format:
/// 3 to 20 characters drawn from `[a-z0-9_-]`.
pub fn is_valid_username(username: &str) -> bool {
    username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        && (3..=20).contains(&username.len())
}
