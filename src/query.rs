//! Read-only queries over a [`Dataset`]. Nothing here performs I/O.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::dataset::Dataset;
use crate::domain::{Alert, CountryKeyed, Interval, Origin, ReferenceId};

/// One country or a set of countries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Countries {
    One(String),
    Many(Vec<String>),
}

impl Countries {
    pub fn matches(&self, country: &str) -> bool {
        match self {
            Countries::One(value) => value == country,
            Countries::Many(values) => values.iter().any(|value| value == country),
        }
    }
}

impl From<&str> for Countries {
    fn from(value: &str) -> Self {
        Countries::One(value.to_string())
    }
}

impl From<String> for Countries {
    fn from(value: String) -> Self {
        Countries::One(value)
    }
}

impl From<Vec<String>> for Countries {
    fn from(values: Vec<String>) -> Self {
        Countries::Many(values)
    }
}

impl From<&[&str]> for Countries {
    fn from(values: &[&str]) -> Self {
        Countries::Many(values.iter().map(|value| value.to_string()).collect())
    }
}

/// Filters for [`QueryEngine::select_alerts`]; unset fields match everything.
///
/// `product` is compared against every alert's product even when no `category` is set.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub countries: Option<Countries>,
    pub interval: Option<Interval>,
    pub category: Option<String>,
    pub product: Option<String>,
}

impl AlertFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn countries(mut self, countries: impl Into<Countries>) -> Self {
        self.countries = Some(countries.into());
        self
    }

    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(interval) = &self.interval {
            if !interval.contains(alert.date) {
                return false;
            }
        }
        if let Some(countries) = &self.countries {
            if !countries.matches(&alert.country) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &alert.product_category != category {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if &alert.product != product {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCatalog {
    pub categories: Vec<String>,
    pub products: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pies {
    pub product_categories: Vec<CategoryCount>,
    pub hazard_categories: Vec<CategoryCount>,
}

#[derive(Clone, Copy)]
pub struct QueryEngine<'a> {
    dataset: &'a Dataset,
}

impl<'a> QueryEngine<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    /// Alerts matching every set filter, in corpus order.
    pub fn select_alerts(&self, filter: &AlertFilter) -> Vec<&'a Alert> {
        self.dataset
            .alerts()
            .iter()
            .filter(|alert| filter.matches(alert))
            .collect()
    }

    /// Origins whose reference is in `references`, or every origin when `None`.
    pub fn select_origins(&self, references: Option<&[ReferenceId]>) -> Vec<&'a Origin> {
        let origins = self.dataset.origins().iter();
        match references {
            None => origins.collect(),
            Some(references) => {
                let wanted: HashSet<&ReferenceId> = references.iter().collect();
                origins
                    .filter(|origin| wanted.contains(&origin.reference))
                    .collect()
            }
        }
    }

    /// Origins of the given alerts.
    pub fn origins_for(&self, alerts: &[&Alert]) -> Vec<&'a Origin> {
        let wanted: HashSet<&ReferenceId> = alerts.iter().map(|alert| &alert.reference).collect();
        self.dataset
            .origins()
            .iter()
            .filter(|origin| wanted.contains(&origin.reference))
            .collect()
    }

    /// Categories and the products seen under each, catch-all and obsolete names last.
    pub fn category_catalog(&self) -> CategoryCatalog {
        let mut by_category: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for alert in self.dataset.alerts() {
            by_category
                .entry(alert.product_category.as_str())
                .or_default()
                .insert(alert.product.as_str());
        }

        let categories = sorted_by_catalog_key(by_category.keys().copied());
        let products = by_category
            .into_iter()
            .map(|(category, products)| {
                (category.to_string(), sorted_by_catalog_key(products.into_iter()))
            })
            .collect();
        CategoryCatalog {
            categories,
            products,
        }
    }

    /// Alert counts per product category and hazard counts per hazard category for the
    /// alerts selected by `countries` and `interval`.
    pub fn pies(&self, countries: Option<Countries>, interval: Option<Interval>) -> Pies {
        let filter = AlertFilter {
            countries,
            interval,
            ..AlertFilter::default()
        };
        let alerts = self.select_alerts(&filter);
        let selected: HashSet<&ReferenceId> = alerts.iter().map(|alert| &alert.reference).collect();

        let product_categories =
            count_by(alerts.iter().map(|alert| alert.product_category.as_str()));
        let hazard_categories = count_by(
            self.dataset
                .hazards()
                .iter()
                .filter(|hazard| selected.contains(&hazard.reference))
                .map(|hazard| hazard.category.as_str()),
        );
        Pies {
            product_categories,
            hazard_categories,
        }
    }
}

/// Number of records per country, keyed by country name.
pub fn group_by_country<I>(records: I) -> BTreeMap<String, usize>
where
    I: IntoIterator,
    I::Item: CountryKeyed,
{
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.country().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Sort key putting plain names first, then `(other)`, then `(obsolete)`.
pub fn catalog_key(name: &str) -> (u8, &str) {
    let tier = if name.ends_with("(obsolete)") {
        2
    } else if name.ends_with("(other)") {
        1
    } else {
        0
    };
    (tier, name)
}

pub fn sorted_by_catalog_key<'n>(names: impl Iterator<Item = &'n str>) -> Vec<String> {
    let mut names: Vec<&str> = names.collect();
    names.sort_by(|a, b| catalog_key(a).cmp(&catalog_key(b)));
    names.dedup();
    names.into_iter().map(str::to_string).collect()
}

fn count_by<'n>(names: impl Iterator<Item = &'n str>) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(name, count)| CategoryCount {
            name: name.to_string(),
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_key_tiers() {
        assert_eq!(catalog_key("Fruit"), (0, "Fruit"));
        assert_eq!(catalog_key("Fruit (other)"), (1, "Fruit (other)"));
        assert_eq!(catalog_key("Fruit (obsolete)"), (2, "Fruit (obsolete)"));
    }

    #[test]
    fn catalog_sort_orders_tiers_then_names() {
        let sorted = sorted_by_catalog_key(
            ["Fruit", "Fruit (other)", "Fruit (obsolete)", "Dairy"].into_iter(),
        );
        assert_eq!(sorted, vec!["Dairy", "Fruit", "Fruit (other)", "Fruit (obsolete)"]);
    }

    #[test]
    fn countries_match_single_and_many() {
        assert!(Countries::from("Italy").matches("Italy"));
        let many = Countries::from(&["Germany", "Italy"][..]);
        assert!(many.matches("Germany"));
        assert!(!many.matches("France"));
    }
}
