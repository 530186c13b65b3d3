//! Execution plan building.
//!
//! A plan is the concrete ordered sequence of tests and whole-subcategory
//! units computed before running a category. Planning is pure; the engine
//! executes the plan against live collaborators.

use std::path::PathBuf;

use super::model::{Category, Test};

/// One planned unit: either a direct test or an entire subcategory run
/// inline on the same session and context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    Test(Test),
    Subcategory(Category),
}

impl PlanItem {
    pub fn display_name(&self) -> &str {
        match self {
            PlanItem::Test(test) => &test.name,
            PlanItem::Subcategory(category) => &category.name,
        }
    }
}

/// Build the execution plan for a category.
///
/// With an explicit `execution_order` the declared order is used verbatim
/// (test ids and subcategory folder names), with undeclared children
/// appended at the end. Otherwise tests run in discovery order; a
/// subcategory with `run_after` is inserted immediately after the named
/// sibling test, and subcategories without one are appended after all
/// tests in discovery order.
pub fn build_plan(category: &Category) -> Vec<PlanItem> {
    if let Some(order) = &category.execution_order {
        return plan_from_execution_order(category, order);
    }

    let mut items = Vec::new();
    let mut tail: Vec<&Category> = Vec::new();
    let mut placed: Vec<bool> = vec![false; category.subcategories.len()];

    for test in &category.tests {
        items.push(PlanItem::Test(test.clone()));
        for (idx, sub) in category.subcategories.iter().enumerate() {
            if placed[idx] {
                continue;
            }
            let Some(after) = &sub.run_after else {
                continue;
            };
            if *after == test.id || *after == test.name {
                items.push(PlanItem::Subcategory(sub.clone()));
                placed[idx] = true;
            }
        }
    }

    for (idx, sub) in category.subcategories.iter().enumerate() {
        if !placed[idx] {
            tail.push(sub);
        }
    }
    items.extend(tail.into_iter().map(|sub| PlanItem::Subcategory(sub.clone())));
    items
}

fn plan_from_execution_order(category: &Category, order: &[String]) -> Vec<PlanItem> {
    let mut items = Vec::new();
    let mut used_tests = vec![false; category.tests.len()];
    let mut used_subs = vec![false; category.subcategories.len()];

    for entry in order {
        if let Some(idx) = category.tests.iter().position(|t| t.id == *entry) {
            if !used_tests[idx] {
                items.push(PlanItem::Test(category.tests[idx].clone()));
                used_tests[idx] = true;
            }
            continue;
        }
        if let Some(idx) = category
            .subcategories
            .iter()
            .position(|s| s.folder_name() == *entry)
        {
            if !used_subs[idx] {
                items.push(PlanItem::Subcategory(category.subcategories[idx].clone()));
                used_subs[idx] = true;
            }
        }
        // Unknown entries are ignored; discovery already warned about them.
    }

    for (idx, test) in category.tests.iter().enumerate() {
        if !used_tests[idx] {
            items.push(PlanItem::Test(test.clone()));
        }
    }
    for (idx, sub) in category.subcategories.iter().enumerate() {
        if !used_subs[idx] {
            items.push(PlanItem::Subcategory(sub.clone()));
        }
    }
    items
}

/// Number of test units a plan covers, counting subcategories recursively.
pub fn plan_unit_count(plan: &[PlanItem]) -> usize {
    plan.iter()
        .map(|item| match item {
            PlanItem::Test(_) => 1,
            PlanItem::Subcategory(category) => category.test_count(),
        })
        .sum()
}

/// A planned unit flattened for skip records, with subcategory units
/// name-prefixed by their subcategory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub display_name: String,
    pub path: PathBuf,
}

/// Expand plan items into their constituent test units, recursively
/// unrolling subcategories.
pub fn expand_plan_units(plan: &[PlanItem]) -> Vec<PlannedUnit> {
    let mut units = Vec::new();
    for item in plan {
        match item {
            PlanItem::Test(test) => units.push(PlannedUnit {
                display_name: test.name.clone(),
                path: test.path.clone(),
            }),
            PlanItem::Subcategory(category) => {
                expand_category_units(category, &category.name, &mut units);
            }
        }
    }
    units
}

fn expand_category_units(category: &Category, prefix: &str, out: &mut Vec<PlannedUnit>) {
    for test in &category.tests {
        out.push(PlannedUnit {
            display_name: format!("{prefix}/{}", test.name),
            path: test.path.clone(),
        });
    }
    for sub in &category.subcategories {
        let nested = format!("{prefix}/{}", sub.name);
        expand_category_units(sub, &nested, out);
    }
}
