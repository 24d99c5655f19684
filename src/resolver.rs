// Version Resolver: stateless mapping from a version selector (tag, exact
// semver, semver range, commit hash) to a concrete stored version. Range
// expressions only ever match released versions; commit hashes match any
// version ever built.

use semver::{Version, VersionReq};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::store::{Module, ModuleVersion, StoreError, Tag, VersionRef};

#[derive(Debug, Clone, Default)]
pub struct ResolveConstraints {
    /// Fail tag resolutions whose bound version lacks the dynamic-service
    /// flag.
    pub only_service_versions: bool,
}

fn lookup<'a>(
    history: &'a [ModuleVersion],
    vref: &VersionRef,
    module: &Module,
) -> Result<&'a ModuleVersion> {
    history
        .iter()
        .find(|v| v.git_commit_hash == vref.git_commit_hash)
        .ok_or_else(|| {
            RegistryError::Store(StoreError::Integrity(format!(
                "module '{}' references missing version {}",
                module.display_name(),
                vref.git_commit_hash
            )))
        })
}

fn resolve_tag(
    module: &Module,
    history: &[ModuleVersion],
    tag: Tag,
    constraints: &ResolveConstraints,
) -> Result<Option<ModuleVersion>> {
    let Some(vref) = module.current_versions.get(tag) else {
        return Ok(None);
    };
    let version = lookup(history, vref, module)?;
    if constraints.only_service_versions && !version.dynamic_service {
        return Err(RegistryError::NotAService(tag.as_str().to_string()));
    }
    Ok(Some(version.clone()))
}

/// Resolve a selector against a module's tags and full version history.
///
/// An unset selector tries `release`, then `beta`, then `dev`, returning the
/// first tag that is bound. A selector that matches none of the strategies
/// resolves to `Ok(None)`; callers render that as an empty result.
pub fn resolve_version(
    module: &Module,
    history: &[ModuleVersion],
    selector: Option<&str>,
    constraints: &ResolveConstraints,
) -> Result<Option<ModuleVersion>> {
    let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
        for tag in [Tag::Release, Tag::Beta, Tag::Dev] {
            if module.current_versions.get(tag).is_some() {
                return resolve_tag(module, history, tag, constraints);
            }
        }
        return Ok(None);
    };

    if let Some(tag) = Tag::parse(selector) {
        return resolve_tag(module, history, tag, constraints);
    }

    // Exact commit hash, across everything ever built.
    if let Some(version) = history.iter().find(|v| v.git_commit_hash == selector) {
        return Ok(Some(version.clone()));
    }

    // Exact semantic version, within the release history only. Two releases
    // carrying the same version string would mean the monotonic-version
    // invariant was violated at promotion time.
    if let Ok(wanted) = Version::parse(selector) {
        let matches: Vec<&VersionRef> = module
            .release_version_list
            .iter()
            .filter(|r| Version::parse(&r.version).map_or(false, |v| v == wanted))
            .collect();
        return match matches.as_slice() {
            [] => Ok(None),
            [single] => lookup(history, single, module).map(|v| Some(v.clone())),
            _ => Err(RegistryError::Store(StoreError::Integrity(format!(
                "module '{}' has {} release entries for version {wanted}",
                module.display_name(),
                matches.len()
            )))),
        };
    }

    // Semantic-version range; the maximum released version satisfying it.
    if let Ok(req) = VersionReq::parse(selector) {
        let best = history
            .iter()
            .filter(|v| v.released)
            .filter_map(|v| Version::parse(&v.version).ok().map(|parsed| (parsed, v)))
            .filter(|(parsed, _)| req.matches(parsed))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v.clone());
        return Ok(best);
    }

    debug!(
        module = %module.display_name(),
        selector = %selector,
        "version selector matched no strategy"
    );
    Ok(None)
}

/// Tag-first lookup with secondary equality constraints. Unlike
/// [`resolve_version`] this mode accepts tag names only; any supplied
/// `timestamp` or `git_commit_hash` must equal the resolved version's fields
/// exactly or the result is `None` even though the tag is bound.
pub fn find_version_info(
    module: &Module,
    history: &[ModuleVersion],
    tag: Option<Tag>,
    timestamp: Option<i64>,
    git_commit_hash: Option<&str>,
) -> Result<Option<ModuleVersion>> {
    if let Some(tag) = tag {
        let Some(version) = resolve_tag(module, history, tag, &ResolveConstraints::default())?
        else {
            return Ok(None);
        };
        if timestamp.is_some_and(|ts| ts != version.timestamp) {
            return Ok(None);
        }
        if git_commit_hash.is_some_and(|c| c != version.git_commit_hash) {
            return Ok(None);
        }
        return Ok(Some(version));
    }

    if timestamp.is_none() && git_commit_hash.is_none() {
        return Err(RegistryError::InvalidInput(
            "version lookup requires a tag, a timestamp, or a commit hash".to_string(),
        ));
    }

    let matches = |r: &VersionRef| {
        timestamp.map_or(true, |ts| ts == r.timestamp)
            && git_commit_hash.map_or(true, |c| c == r.git_commit_hash)
    };

    // Current tags first, then the full release history; first match wins.
    let current = [Tag::Release, Tag::Beta, Tag::Dev]
        .iter()
        .filter_map(|t| module.current_versions.get(*t));
    for vref in current.chain(module.release_version_list.iter()) {
        if matches(vref) {
            return lookup(history, vref, module).map(|v| Some(v.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CurrentVersions, ModuleState, RegistrationState, ReleaseApproval};

    fn version(commit: &str, ver: &str, timestamp: i64, released: bool) -> ModuleVersion {
        ModuleVersion {
            module_name_lc: "widgettools".to_string(),
            git_commit_hash: commit.to_string(),
            version: ver.to_string(),
            timestamp,
            registration_id: format!("{timestamp}_test"),
            narrative_methods: vec![],
            module_description: String::new(),
            module_language: String::new(),
            notes: String::new(),
            compilation_report: None,
            dynamic_service: false,
            released,
            release_timestamp: released.then_some(timestamp),
        }
    }

    /// Fixture: dev@0.0.5(hashD), beta@0.0.4(hashB), release@0.0.3(hashR),
    /// release history [0.0.1(h1), 0.0.2(h2), 0.0.3(hashR)].
    fn fixture() -> (Module, Vec<ModuleVersion>) {
        let history = vec![
            version("h1", "0.0.1", 100, true),
            version("h2", "0.0.2", 200, true),
            version("hashR", "0.0.3", 300, true),
            version("hashB", "0.0.4", 400, false),
            version("hashD", "0.0.5", 500, false),
        ];
        let vref = |i: usize| history[i].as_ref();
        let module = Module {
            module_name: Some("WidgetTools".to_string()),
            module_name_lc: Some("widgettools".to_string()),
            git_url: "https://github.com/devs/widget_tools".to_string(),
            owners: vec!["alice".to_string()],
            description: String::new(),
            language: String::new(),
            state: ModuleState {
                active: true,
                released: true,
                registration: RegistrationState::Complete,
                error_message: String::new(),
                release_approval: ReleaseApproval::NotRequested,
                review_message: String::new(),
            },
            current_versions: CurrentVersions {
                dev: Some(vref(4)),
                beta: Some(vref(3)),
                release: Some(vref(2)),
            },
            release_version_list: vec![vref(0), vref(1), vref(2)],
            registration_id: "500_test".to_string(),
            created_at: 100,
        };
        (module, history)
    }

    fn resolve(selector: Option<&str>) -> Option<ModuleVersion> {
        let (module, history) = fixture();
        resolve_version(&module, &history, selector, &ResolveConstraints::default()).unwrap()
    }

    #[test]
    fn tag_selector_returns_bound_version() {
        assert_eq!(resolve(Some("release")).unwrap().git_commit_hash, "hashR");
        assert_eq!(resolve(Some("beta")).unwrap().git_commit_hash, "hashB");
        assert_eq!(resolve(Some("dev")).unwrap().git_commit_hash, "hashD");
    }

    #[test]
    fn unset_selector_prefers_release_then_beta_then_dev() {
        assert_eq!(resolve(None).unwrap().git_commit_hash, "hashR");

        let (mut module, history) = fixture();
        module.current_versions.release = None;
        let v = resolve_version(&module, &history, None, &ResolveConstraints::default())
            .unwrap()
            .unwrap();
        assert_eq!(v.git_commit_hash, "hashB");

        module.current_versions.beta = None;
        let v = resolve_version(&module, &history, None, &ResolveConstraints::default())
            .unwrap()
            .unwrap();
        assert_eq!(v.git_commit_hash, "hashD");
    }

    #[test]
    fn exact_semver_searches_release_history() {
        assert_eq!(resolve(Some("0.0.2")).unwrap().git_commit_hash, "h2");
        // 0.0.4 exists but was never released.
        assert!(resolve(Some("0.0.4")).is_none());
        assert!(resolve(Some("2.0.0")).is_none());
    }

    #[test]
    fn range_selects_maximum_released_match() {
        assert_eq!(
            resolve(Some(">0.0.1, <0.0.3")).unwrap().git_commit_hash,
            "h2"
        );
        assert_eq!(resolve(Some(">=0.0.1")).unwrap().git_commit_hash, "hashR");
        // Ranges never match unreleased versions.
        assert!(resolve(Some(">0.0.3")).is_none());
    }

    #[test]
    fn commit_hash_matches_unreleased_versions_too() {
        assert_eq!(resolve(Some("hashD")).unwrap().git_commit_hash, "hashD");
        assert_eq!(resolve(Some("h1")).unwrap().git_commit_hash, "h1");
    }

    #[test]
    fn empty_tag_slot_resolves_to_none() {
        let (mut module, history) = fixture();
        module.current_versions.beta = None;
        let v = resolve_version(
            &module,
            &history,
            Some("beta"),
            &ResolveConstraints::default(),
        )
        .unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn dangling_tag_reference_is_an_integrity_error() {
        let (module, mut history) = fixture();
        history.retain(|v| v.git_commit_hash != "hashR");
        let err = resolve_version(
            &module,
            &history,
            Some("release"),
            &ResolveConstraints::default(),
        )
        .unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn service_constraint_rejects_non_service_versions() {
        let (module, mut history) = fixture();
        let constraints = ResolveConstraints {
            only_service_versions: true,
        };
        let err = resolve_version(&module, &history, Some("release"), &constraints).unwrap_err();
        assert!(matches!(err, RegistryError::NotAService(_)));

        history[2].dynamic_service = true;
        let v = resolve_version(&module, &history, Some("release"), &constraints)
            .unwrap()
            .unwrap();
        assert_eq!(v.git_commit_hash, "hashR");
    }

    #[test]
    fn info_lookup_constraints_must_match_exactly() {
        let (module, history) = fixture();

        let v = find_version_info(&module, &history, Some(Tag::Release), Some(300), None)
            .unwrap()
            .unwrap();
        assert_eq!(v.git_commit_hash, "hashR");

        // Tag is bound, but the constraint disagrees: no version found.
        let v = find_version_info(&module, &history, Some(Tag::Release), Some(999), None).unwrap();
        assert!(v.is_none());
        let v =
            find_version_info(&module, &history, Some(Tag::Release), None, Some("hashD")).unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn info_lookup_without_tag_searches_tags_then_history() {
        let (module, history) = fixture();

        let v = find_version_info(&module, &history, None, None, Some("h1"))
            .unwrap()
            .unwrap();
        assert_eq!(v.version, "0.0.1");

        let v = find_version_info(&module, &history, None, Some(400), None)
            .unwrap()
            .unwrap();
        assert_eq!(v.git_commit_hash, "hashB");

        // Co-supplied fields must both match.
        let v = find_version_info(&module, &history, None, Some(400), Some("h1")).unwrap();
        assert!(v.is_none());

        assert!(find_version_info(&module, &history, None, None, None).is_err());
    }
}
