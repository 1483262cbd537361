//! In-memory cache of monitored locations, replaced wholesale on refresh.

use std::collections::HashMap;

use aquamon_types::{Coordinates, LocationRecord};

#[derive(Debug, Default, Clone)]
pub struct LocationCache {
    records: Vec<LocationRecord>,
    index: HashMap<String, usize>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every cached record. Later duplicates of an id win.
    pub fn replace(&mut self, records: Vec<LocationRecord>) {
        self.index.clear();
        self.records.clear();
        for record in records {
            match self.index.get(&record.id) {
                Some(&slot) => self.records[slot] = record,
                None => {
                    self.index.insert(record.id.clone(), self.records.len());
                    self.records.push(record);
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&LocationRecord> {
        self.index.get(id).map(|&slot| &self.records[slot])
    }

    pub fn coordinates_of(&self, id: &str) -> Option<Coordinates> {
        self.get(id).and_then(LocationRecord::coordinates)
    }

    /// All records in server order.
    pub fn all(&self) -> &[LocationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(id: &str, lat: f64) -> LocationRecord {
        LocationRecord {
            id: id.into(),
            name: format!("site {id}"),
            address: String::new(),
            latitude: lat,
            longitude: 106.0,
            created_at: None,
        }
    }

    #[test]
    fn replace_is_wholesale() {
        let mut cache = LocationCache::new();
        cache.replace(vec![loc("a", 1.0), loc("b", 2.0)]);
        cache.replace(vec![loc("c", 3.0)]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.coordinates_of("c").map(|c| c.latitude), Some(3.0));
    }

    #[test]
    fn duplicate_ids_keep_first_position_last_value() {
        let mut cache = LocationCache::new();
        cache.replace(vec![loc("a", 1.0), loc("b", 2.0), loc("a", 5.0)]);
        let ids: Vec<_> = cache.all().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(cache.get("a").map(|l| l.latitude), Some(5.0));
    }
}
