// Deployment resolution
// Maps (sensor type, instance) to the deployment a sample belongs to.
// Loaded once per run; lookups never touch the database.

use std::collections::{HashMap, HashSet};
use rusqlite::Connection;

use crate::db::schema::{list_deployments_for_mission, SensorDeployment, SensorType};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct DeploymentResolver {
    mission_id: i64,
    by_key: HashMap<(SensorType, u8), i64>,
    warned: HashSet<(SensorType, u8)>,
}

impl DeploymentResolver {
    pub fn load(conn: &Connection, mission_id: i64) -> Result<Self> {
        let deployments = list_deployments_for_mission(conn, mission_id)?;
        Ok(Self::from_deployments(mission_id, &deployments))
    }

    /// Deployments must be ordered by id; the first one per key wins.
    pub fn from_deployments(mission_id: i64, deployments: &[SensorDeployment]) -> Self {
        let mut by_key = HashMap::new();
        for d in deployments {
            let key = (d.sensor_type, d.instance);
            if let Some(&kept) = by_key.get(&key) {
                log::warn!(
                    "Mission {} has more than one {} deployment for instance {} (keeping #{}, ignoring #{})",
                    mission_id, d.sensor_type, d.instance, kept, d.id
                );
                continue;
            }
            by_key.insert(key, d.id);
        }
        log::debug!("Resolved {} deployment keys for mission {}", by_key.len(), mission_id);
        Self {
            mission_id,
            by_key,
            warned: HashSet::new(),
        }
    }

    /// Deployment id for a sample, or None. A miss is logged once per key;
    /// callers count it as a skip.
    pub fn resolve(&mut self, sensor_type: SensorType, instance: u8) -> Option<i64> {
        let key = (sensor_type, instance);
        match self.by_key.get(&key) {
            Some(&id) => Some(id),
            None => {
                if self.warned.insert(key) {
                    log::warn!(
                        "No {} deployment for instance {} in mission {}; skipping its samples",
                        sensor_type, instance, self.mission_id
                    );
                }
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(id: i64, sensor_type: SensorType, instance: u8) -> SensorDeployment {
        SensorDeployment {
            id,
            mission_id: 1,
            sensor_id: id * 10,
            sensor_type,
            instance,
            position: String::new(),
        }
    }

    #[test]
    fn test_resolves_by_type_and_instance() {
        let mut r = DeploymentResolver::from_deployments(1, &[
            dep(1, SensorType::Compass, 0),
            dep(2, SensorType::Compass, 1),
            dep(3, SensorType::Imu, 0),
        ]);
        assert_eq!(r.resolve(SensorType::Compass, 0), Some(1));
        assert_eq!(r.resolve(SensorType::Compass, 1), Some(2));
        assert_eq!(r.resolve(SensorType::Imu, 0), Some(3));
        assert_eq!(r.resolve(SensorType::Imu, 1), None);
    }

    #[test]
    fn test_lowest_id_wins_on_collision() {
        let r = DeploymentResolver::from_deployments(1, &[
            dep(4, SensorType::Pressure, 1),
            dep(9, SensorType::Pressure, 1),
        ]);
        assert_eq!(r.by_key.len(), 1);
        assert_eq!(r.by_key.get(&(SensorType::Pressure, 1)), Some(&4));
    }

    #[test]
    fn test_miss_warned_once_per_key() {
        let mut r = DeploymentResolver::from_deployments(1, &[]);
        assert!(r.is_empty());
        for _ in 0..5 {
            assert_eq!(r.resolve(SensorType::Imu, 0), None);
        }
        assert_eq!(r.resolve(SensorType::Compass, 1), None);
        assert_eq!(r.warned.len(), 2);
    }
}
