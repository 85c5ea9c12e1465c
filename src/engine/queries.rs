use std::collections::HashMap;

use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Entity, GroupSearch, ReservationFilter};

/// A club together with its courts, as returned by [`Engine::search_resources`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupWithResources {
    #[serde(flatten)]
    pub group: Group,
    pub resources: Vec<Resource>,
}

fn by_name(a: &Group, b: &Group) -> std::cmp::Ordering {
    (&a.name, &a.id).cmp(&(&b.name, &b.id))
}

impl Engine {
    pub async fn get_group(&self, id: &str) -> Result<Group, EngineError> {
        self.call("get", self.store().get(&Key::group(id)))
            .await?
            .and_then(Item::into_group)
            .ok_or_else(|| EngineError::NotFound(Entity::Group, id.to_string()))
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource, EngineError> {
        self.call("get", self.store().get(&Key::resource(id)))
            .await?
            .and_then(Item::into_resource)
            .ok_or_else(|| EngineError::NotFound(Entity::Resource, id.to_string()))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.call("get", self.store().get(&Key::reservation(id)))
            .await?
            .and_then(Item::into_reservation)
            .ok_or_else(|| EngineError::NotFound(Entity::Reservation, id.to_string()))
    }

    /// Reservations matching every set field of `filter`, in any status,
    /// ordered by date, then start time, then id.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let matches = |item: &Item| {
            item.as_reservation().is_some_and(|r| {
                filter.requester_id.as_ref().is_none_or(|v| *v == r.requester_id)
                    && filter.resource_id.as_ref().is_none_or(|v| *v == r.resource_id)
                    && filter.group_id.as_ref().is_none_or(|v| *v == r.group_id)
                    && filter.date.is_none_or(|d| d == r.date)
            })
        };
        let items = self.call("scan", self.store().scan(&matches)).await?;
        let mut out: Vec<Reservation> = items.into_iter().filter_map(Item::into_reservation).collect();
        out.sort_by(|a, b| {
            (a.date, &a.start_time, a.id).cmp(&(b.date, &b.start_time, b.id))
        });
        Ok(out)
    }

    /// Resources whose status is Available, ordered by group then name.
    pub async fn available_resources(&self) -> Result<Vec<Resource>, EngineError> {
        let available = |item: &Item| {
            item.as_resource()
                .is_some_and(|r| r.status == ResourceStatus::Available)
        };
        let items = self.call("scan", self.store().scan(&available)).await?;
        let mut out: Vec<Resource> = items.into_iter().filter_map(Item::into_resource).collect();
        out.sort_by(|a, b| (&a.group_id, &a.name, &a.id).cmp(&(&b.group_id, &b.name, &b.id)));
        Ok(out)
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, EngineError> {
        let items = self.call("scan", self.store().scan(&|item: &Item| matches!(item, Item::Group(_)))).await?;
        let mut out: Vec<Group> = items.into_iter().filter_map(Item::into_group).collect();
        out.sort_by(by_name);
        Ok(out)
    }

    /// All resources in any status, optionally only those of one group,
    /// ordered by group then name.
    pub async fn list_resources(&self, group_id: Option<&str>) -> Result<Vec<Resource>, EngineError> {
        let matches = |item: &Item| {
            item.as_resource()
                .is_some_and(|r| group_id.is_none_or(|g| g == r.group_id))
        };
        let items = self.call("scan", self.store().scan(&matches)).await?;
        let mut out: Vec<Resource> = items.into_iter().filter_map(Item::into_resource).collect();
        out.sort_by(|a, b| (&a.group_id, &a.name, &a.id).cmp(&(&b.group_id, &b.name, &b.id)));
        Ok(out)
    }

    /// Clubs whose name and district contain the given terms, each with its
    /// courts. Matching is case-sensitive; a club without a district never
    /// matches a district term.
    pub async fn search_resources(&self, search: &GroupSearch) -> Result<Vec<GroupWithResources>, EngineError> {
        let (name, district, limit) = search.validate()?;
        let matches = |item: &Item| match item {
            Item::Group(g) => {
                name.is_none_or(|t| g.name.contains(t))
                    && district.is_none_or(|t| g.district.as_deref().is_some_and(|d| d.contains(t)))
            }
            _ => false,
        };
        let items = self.call("scan", self.store().scan(&matches)).await?;
        let mut groups: Vec<Group> = items.into_iter().filter_map(Item::into_group).collect();
        groups.sort_by(by_name);
        groups.truncate(limit);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let mut courts: HashMap<&str, Vec<Resource>> =
            groups.iter().map(|g| (g.id.as_str(), Vec::new())).collect();
        let in_groups = |item: &Item| item.as_resource().is_some_and(|r| courts.contains_key(r.group_id.as_str()));
        let items = self.call("scan", self.store().scan(&in_groups)).await?;
        for r in items.into_iter().filter_map(Item::into_resource) {
            if let Some(list) = courts.get_mut(r.group_id.as_str()) {
                list.push(r);
            }
        }

        let mut out = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut resources = courts.remove(group.id.as_str()).unwrap_or_default();
            resources.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
            out.push(GroupWithResources { group: group.clone(), resources });
        }
        Ok(out)
    }
}
