//! robots.txt Parsing & Matching
//! Longest pattern wins; Allow breaks ties on equal length.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotsRule {
    pub allow: bool,
    pub pattern: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotsGroup {
    pub agents: Vec<String>,
    pub rules: Vec<RobotsRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotsRules {
    pub groups: Vec<RobotsGroup>,
}

/// Outcome of matching one path against the rules
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub allowed: bool,
    pub matched_rule: Option<String>,
}

pub fn parse(text: &str) -> RobotsRules {
    let mut groups: Vec<RobotsGroup> = Vec::new();
    let mut current = RobotsGroup::default();
    // Consecutive User-agent lines share one group; a directive closes the
    // agent list until the next User-agent starts a new group.
    let mut accepting_agents = true;

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if !accepting_agents {
                    if !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    accepting_agents = true;
                }
                current.agents.push(value.to_lowercase());
            }
            "allow" | "disallow" => {
                if current.agents.is_empty() {
                    // Directive before any User-agent line; applies to all
                    current.agents.push("*".to_string());
                }
                accepting_agents = false;
                // Empty Disallow means "allow everything"; no rule needed
                if !value.is_empty() {
                    current.rules.push(RobotsRule {
                        allow: key == "allow",
                        pattern: value,
                    });
                }
            }
            // crawl-delay, sitemap and friends are out of our scope
            _ => {
                accepting_agents = false;
            }
        }
    }
    if !current.agents.is_empty() {
        groups.push(current);
    }

    RobotsRules { groups }
}

impl RobotsRules {
    /// Match a path for a user agent. No applicable rule means allowed.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> RuleMatch {
        let Some(group) = self.group_for(user_agent) else {
            return RuleMatch {
                allowed: true,
                matched_rule: None,
            };
        };

        let mut best: Option<&RobotsRule> = None;
        for rule in &group.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            best = match best {
                None => Some(rule),
                Some(current) => {
                    if rule.pattern.len() > current.pattern.len()
                        || (rule.pattern.len() == current.pattern.len()
                            && rule.allow
                            && !current.allow)
                    {
                        Some(rule)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        match best {
            Some(rule) => RuleMatch {
                allowed: rule.allow,
                matched_rule: Some(format!(
                    "{}: {}",
                    if rule.allow { "Allow" } else { "Disallow" },
                    rule.pattern
                )),
            },
            None => RuleMatch {
                allowed: true,
                matched_rule: None,
            },
        }
    }

    /// Group whose agent token best matches the UA; `*` is the fallback
    fn group_for(&self, user_agent: &str) -> Option<&RobotsGroup> {
        let ua = user_agent.to_lowercase();

        let mut best: Option<(&RobotsGroup, usize)> = None;
        for group in &self.groups {
            for agent in &group.agents {
                let score = if agent == "*" {
                    Some(0)
                } else if ua.contains(agent.as_str()) {
                    Some(agent.len())
                } else {
                    None
                };
                if let Some(score) = score {
                    if best.map(|(_, s)| score > s).unwrap_or(true) {
                        best = Some((group, score));
                    }
                }
            }
        }
        best.map(|(g, _)| g)
    }
}

/// Glob-ish match: `*` spans anything, trailing `$` anchors the end.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();

    // No wildcards: plain prefix (or exact with anchor)
    if parts.len() == 1 {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !path.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else {
            match path[pos..].find(part) {
                Some(offset) => pos = pos + offset + part.len(),
                None => return false,
            }
        }
    }

    if anchored {
        // Last literal part must reach the end unless the pattern ends in '*'
        if parts.last().map(|p| !p.is_empty()).unwrap_or(false) {
            return pos == path.len();
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# comments are ignored
User-agent: *
Disallow: /admin/
Allow: /admin/public/

User-agent: harvestbot
User-agent: otherbot
Disallow: /private/
Allow: /

User-agent: badbot
Disallow: /
"#;

    #[test]
    fn star_group_longest_match_wins() {
        let rules = parse(SAMPLE);
        let m = rules.is_allowed("SomeCrawler/1.0", "/admin/public/page");
        assert!(m.allowed);
        assert_eq!(m.matched_rule.as_deref(), Some("Allow: /admin/public/"));

        let m = rules.is_allowed("SomeCrawler/1.0", "/admin/secret");
        assert!(!m.allowed);
    }

    #[test]
    fn specific_agent_group_preferred() {
        let rules = parse(SAMPLE);
        // harvestbot has its own group; /admin/ rules do not apply to it
        let m = rules.is_allowed("HarvestBot/1.0 (Spec Harvester)", "/admin/secret");
        assert!(m.allowed);

        let m = rules.is_allowed("HarvestBot/1.0 (Spec Harvester)", "/private/x");
        assert!(!m.allowed);
    }

    #[test]
    fn wildcard_and_anchor() {
        let rules = parse("User-agent: *\nDisallow: /*.pdf$\nDisallow: /tmp*\n");

        assert!(!rules.is_allowed("any", "/docs/manual.pdf").allowed);
        assert!(rules.is_allowed("any", "/docs/manual.pdf?x=1").allowed);
        assert!(!rules.is_allowed("any", "/tmp/file").allowed);
        assert!(!rules.is_allowed("any", "/tmpfoo").allowed);
        assert!(rules.is_allowed("any", "/other").allowed);
    }

    #[test]
    fn allow_breaks_equal_length_ties() {
        let rules = parse("User-agent: *\nDisallow: /page\nAllow: /page\n");
        assert!(rules.is_allowed("any", "/page").allowed);
    }

    #[test]
    fn empty_input_allows_everything() {
        let rules = parse("");
        let m = rules.is_allowed("any", "/anything");
        assert!(m.allowed);
        assert!(m.matched_rule.is_none());
    }
}
