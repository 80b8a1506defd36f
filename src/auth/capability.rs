use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use strum_macros::{AsRefStr, Display, EnumIter};

use crate::auth::auth::AuthUser;
use crate::model::role::Role;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Display, AsRefStr, EnumIter)]
pub enum Capability {
    #[strum(serialize = "schedule.read")]
    ScheduleRead,
    #[strum(serialize = "schedule.manage")]
    ScheduleManage,
    #[strum(serialize = "timetable.read")]
    TimetableRead,
    #[strum(serialize = "timetable.manage")]
    TimetableManage,
    #[strum(serialize = "timetable.publish")]
    TimetablePublish,
    #[strum(serialize = "attendance.read")]
    AttendanceRead,
    #[strum(serialize = "attendance.mark")]
    AttendanceMark,
    /// Edit attendance after the edit window closed, or records marked by someone else
    #[strum(serialize = "attendance.override")]
    AttendanceOverride,
    #[strum(serialize = "attendance.policy")]
    AttendancePolicy,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Allowed,
    Denied,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        self == Access::Allowed
    }
}

/// Capability check consulted once per operation.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, caller: &AuthUser, capability: Capability) -> Access;
}

static ROLE_CAPABILITIES: Lazy<HashMap<Role, HashSet<Capability>>> = Lazy::new(|| {
    use Capability::*;

    let read = [ScheduleRead, TimetableRead, AttendanceRead];
    let mut table = HashMap::new();

    table.insert(
        Role::Admin,
        <Capability as strum::IntoEnumIterator>::iter().collect(),
    );
    table.insert(
        Role::Coordinator,
        read.iter()
            .copied()
            .chain([
                ScheduleManage,
                TimetableManage,
                TimetablePublish,
                AttendanceMark,
                AttendanceOverride,
            ])
            .collect(),
    );
    table.insert(
        Role::Teacher,
        read.iter().copied().chain([AttendanceMark]).collect(),
    );
    table.insert(
        Role::System,
        read.iter()
            .copied()
            .chain([ScheduleManage, TimetableManage, TimetablePublish])
            .collect(),
    );
    table.insert(Role::ApiUser, read.iter().copied().collect());
    table
});

/// Static role → capability table.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, caller: &AuthUser, capability: Capability) -> Access {
        let allowed = ROLE_CAPABILITIES
            .get(&caller.role)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false);

        if allowed {
            Access::Allowed
        } else {
            Access::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "u".into(),
            role,
            tenant_id: 1,
            branch_id: Some(1),
            staff_id: None,
        }
    }

    #[test]
    fn only_admin_and_coordinator_override_attendance() {
        let authz = RoleAuthorizer;
        assert!(authz.authorize(&user(Role::Admin), Capability::AttendanceOverride).is_allowed());
        assert!(authz.authorize(&user(Role::Coordinator), Capability::AttendanceOverride).is_allowed());
        assert!(!authz.authorize(&user(Role::Teacher), Capability::AttendanceOverride).is_allowed());
        assert!(!authz.authorize(&user(Role::System), Capability::AttendanceOverride).is_allowed());
    }

    #[test]
    fn teachers_mark_but_do_not_publish() {
        let authz = RoleAuthorizer;
        let teacher = user(Role::Teacher);
        assert!(authz.authorize(&teacher, Capability::AttendanceMark).is_allowed());
        assert!(!authz.authorize(&teacher, Capability::TimetablePublish).is_allowed());
        assert!(!authz.authorize(&user(Role::ApiUser), Capability::AttendanceMark).is_allowed());
    }

    #[test]
    fn capability_names() {
        assert_eq!(Capability::AttendanceOverride.to_string(), "attendance.override");
    }
}
