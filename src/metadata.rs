//! CI/git metadata collection for the trigger request.
//!
//! Reads already-resolved `DD_GIT_*` / `DD_CI_*` environment variables and
//! shapes them into the metadata block submitted alongside a trigger
//! request. No CI provider is auto-detected here: a user (or an upstream
//! step) is expected to have populated these variables already.

use std::sync::OnceLock;

use serde::Serialize;

/// Git metadata, built from `DD_GIT_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GitMetadata {
    #[serde(rename = "repositoryUrl", skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(rename = "commitSha", skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(rename = "branch", skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(rename = "tag", skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(rename = "authorName", skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(rename = "authorEmail", skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(rename = "authorDate", skip_serializing_if = "Option::is_none")]
    pub author_date: Option<String>,
    #[serde(rename = "committerName", skip_serializing_if = "Option::is_none")]
    pub committer_name: Option<String>,
    #[serde(rename = "committerEmail", skip_serializing_if = "Option::is_none")]
    pub committer_email: Option<String>,
    #[serde(rename = "committerDate", skip_serializing_if = "Option::is_none")]
    pub committer_date: Option<String>,
}

/// CI pipeline metadata, built from `DD_CI_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CiMetadata {
    #[serde(rename = "jobName", skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(rename = "jobUrl", skip_serializing_if = "Option::is_none")]
    pub job_url: Option<String>,
    #[serde(rename = "pipelineId", skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(rename = "pipelineName", skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(rename = "pipelineNumber", skip_serializing_if = "Option::is_none")]
    pub pipeline_number: Option<String>,
    #[serde(rename = "pipelineUrl", skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    #[serde(rename = "providerName", skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(rename = "stageName", skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(rename = "workspacePath", skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
}

/// Full metadata block submitted with a trigger request.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CiGitMetadata {
    #[serde(rename = "git", skip_serializing_if = "is_default_git")]
    pub git: GitMetadata,
    #[serde(rename = "ci", skip_serializing_if = "is_default_ci")]
    pub ci: CiMetadata,
}

fn is_default_git(g: &GitMetadata) -> bool {
    g == &GitMetadata::default()
}

fn is_default_ci(c: &CiMetadata) -> bool {
    c == &CiMetadata::default()
}

/// Reads an environment variable, treating an empty string the same as
/// unset (`spec.md` §6).
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Normalises a raw `DD_GIT_BRANCH` / ref value into `(branch, tag)`.
///
/// - `refs/tags/<name>`, `origin/tags/<name>`, `refs/heads/tags/<name>` are
///   treated as a tag: the branch is cleared.
/// - Otherwise a `refs/heads/` or `origin/` prefix is stripped and the
///   result is treated as a branch.
fn normalize_ref(raw: &str) -> (Option<String>, Option<String>) {
    for prefix in ["refs/tags/", "origin/tags/", "refs/heads/tags/"] {
        if let Some(name) = raw.strip_prefix(prefix) {
            return (None, Some(name.to_string()));
        }
    }
    for prefix in ["refs/heads/", "origin/"] {
        if let Some(name) = raw.strip_prefix(prefix) {
            return (Some(name.to_string()), None);
        }
    }
    (Some(raw.to_string()), None)
}

/// Collects git metadata from the process environment.
pub fn collect_git_metadata() -> GitMetadata {
    let (mut branch, mut tag) = match env_non_empty("DD_GIT_BRANCH") {
        Some(raw) => normalize_ref(&raw),
        None => (None, None),
    };

    // An explicit DD_GIT_TAG always wins and unconditionally clears branch.
    if let Some(explicit_tag) = env_non_empty("DD_GIT_TAG") {
        tag = Some(explicit_tag);
        branch = None;
    }

    GitMetadata {
        repository_url: env_non_empty("DD_GIT_REPOSITORY_URL"),
        commit_sha: env_non_empty("DD_GIT_COMMIT_SHA"),
        branch,
        tag,
        commit_message: env_non_empty("DD_GIT_COMMIT_MESSAGE"),
        author_name: env_non_empty("DD_GIT_COMMIT_AUTHOR_NAME"),
        author_email: env_non_empty("DD_GIT_COMMIT_AUTHOR_EMAIL"),
        author_date: env_non_empty("DD_GIT_COMMIT_AUTHOR_DATE"),
        committer_name: env_non_empty("DD_GIT_COMMIT_COMMITTER_NAME"),
        committer_email: env_non_empty("DD_GIT_COMMIT_COMMITTER_EMAIL"),
        committer_date: env_non_empty("DD_GIT_COMMIT_COMMITTER_DATE"),
    }
}

/// Collects CI pipeline metadata from the process environment. No provider
/// is auto-detected; only already-resolved `DD_CI_*` variables are read.
pub fn collect_ci_metadata() -> CiMetadata {
    CiMetadata {
        job_name: env_non_empty("DD_CI_JOB_NAME"),
        job_url: env_non_empty("DD_CI_JOB_URL"),
        pipeline_id: env_non_empty("DD_CI_PIPELINE_ID"),
        pipeline_name: env_non_empty("DD_CI_PIPELINE_NAME"),
        pipeline_number: env_non_empty("DD_CI_PIPELINE_NUMBER"),
        pipeline_url: env_non_empty("DD_CI_PIPELINE_URL"),
        provider_name: env_non_empty("DD_CI_PROVIDER_NAME"),
        stage_name: env_non_empty("DD_CI_STAGE_NAME"),
        workspace_path: env_non_empty("DD_CI_WORKSPACE_PATH"),
    }
}

/// Collects the full metadata block.
pub fn collect() -> CiGitMetadata {
    CiGitMetadata {
        git: collect_git_metadata(),
        ci: collect_ci_metadata(),
    }
}

/// The `trigger_app` tag submitted with every trigger request. Defaults to
/// `"npm_package"`; a config file or CLI flag may override it once, before
/// the first trigger call (`spec.md` §5, "Shared resources").
static TRIGGER_APP: OnceLock<String> = OnceLock::new();

/// Sets the trigger app name. Has no effect if already set (first call
/// wins) — intended to run once during startup, before any trigger is
/// issued.
pub fn set_trigger_app(name: String) {
    let _ = TRIGGER_APP.set(name);
}

/// Returns the configured trigger app name, or the default.
pub fn trigger_app() -> &'static str {
    TRIGGER_APP.get().map(String::as_str).unwrap_or("npm_package")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // DD_GIT_* / DD_CI_* env var tests must not run concurrently with each
    // other: std::env::set_var affects the whole process.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_git_env() {
        for key in [
            "DD_GIT_REPOSITORY_URL",
            "DD_GIT_COMMIT_SHA",
            "DD_GIT_BRANCH",
            "DD_GIT_TAG",
            "DD_GIT_COMMIT_MESSAGE",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn normalize_ref_strips_refs_heads_prefix() {
        assert_eq!(
            normalize_ref("refs/heads/main"),
            (Some("main".to_string()), None)
        );
    }

    #[test]
    fn normalize_ref_strips_origin_prefix() {
        assert_eq!(
            normalize_ref("origin/main"),
            (Some("main".to_string()), None)
        );
    }

    #[test]
    fn normalize_ref_treats_refs_tags_as_tag_and_clears_branch() {
        assert_eq!(
            normalize_ref("refs/tags/v1.2.3"),
            (None, Some("v1.2.3".to_string()))
        );
    }

    #[test]
    fn normalize_ref_treats_origin_tags_as_tag() {
        assert_eq!(
            normalize_ref("origin/tags/v1.2.3"),
            (None, Some("v1.2.3".to_string()))
        );
    }

    #[test]
    fn normalize_ref_with_no_known_prefix_is_treated_as_branch() {
        assert_eq!(
            normalize_ref("my-feature-branch"),
            (Some("my-feature-branch".to_string()), None)
        );
    }

    #[test]
    fn explicit_git_tag_env_var_clears_branch_unconditionally() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_git_env();
        std::env::set_var("DD_GIT_BRANCH", "refs/heads/main");
        std::env::set_var("DD_GIT_TAG", "v9.9.9");
        let meta = collect_git_metadata();
        assert_eq!(meta.branch, None);
        assert_eq!(meta.tag.as_deref(), Some("v9.9.9"));
        clear_git_env();
    }

    #[test]
    fn empty_string_env_vars_are_treated_as_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_git_env();
        std::env::set_var("DD_GIT_COMMIT_SHA", "");
        let meta = collect_git_metadata();
        assert_eq!(meta.commit_sha, None);
        clear_git_env();
    }

    #[test]
    fn git_metadata_round_trips_through_branch_ref() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_git_env();
        std::env::set_var("DD_GIT_BRANCH", "origin/feature/foo");
        let meta = collect_git_metadata();
        assert_eq!(meta.branch.as_deref(), Some("feature/foo"));
        assert_eq!(meta.tag, None);
        clear_git_env();
    }

    #[test]
    fn trigger_app_defaults_when_unset_in_this_process() {
        // set_trigger_app is first-call-wins; other tests in this binary
        // may have already set it, so only assert the default shape holds
        // when nothing has won yet.
        let app = trigger_app();
        assert!(!app.is_empty());
    }
}
