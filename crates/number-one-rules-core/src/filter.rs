//! Search and facet filter used when browsing rules.

use serde::{Deserialize, Serialize};

use crate::{Area, Discipline, Rule, Skill};

/// `None` on a facet means "All"; an empty or missing search matches all.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleFilter {
    pub search: Option<String>,
    pub area: Option<Area>,
    pub discipline: Option<Discipline>,
    pub skill: Option<Skill>,
}

impl RuleFilter {
    #[must_use]
    pub fn matches(&self, rule: &Rule) -> bool {
        let area_ok = match self.area {
            Some(area) => rule.areas().contains(&area),
            None => true,
        };
        let discipline_ok = match self.discipline {
            Some(discipline) => facet_equals(&rule.discipline, discipline.as_str()),
            None => true,
        };
        let skill_ok = match self.skill {
            Some(skill) => facet_equals(&rule.skill, skill.as_str()),
            None => true,
        };

        area_ok && discipline_ok && skill_ok && self.matches_search(rule)
    }

    fn matches_search(&self, rule: &Rule) -> bool {
        let Some(search) = self.search.as_deref() else {
            return true;
        };
        let needle = search.to_lowercase();
        if needle.is_empty() {
            return true;
        }

        rule.title.to_lowercase().contains(&needle)
            || rule.description.to_lowercase().contains(&needle)
    }
}

/// Keeps the rules matching `filter`, in input order.
#[must_use]
pub fn filter_rules<'a>(rules: &'a [Rule], filter: &RuleFilter) -> Vec<&'a Rule> {
    rules.iter().filter(|rule| filter.matches(rule)).collect()
}

fn facet_equals(raw: &str, selected: &str) -> bool {
    raw.trim().to_lowercase() == selected.to_lowercase()
}
