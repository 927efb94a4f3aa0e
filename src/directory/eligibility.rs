use std::collections::BTreeSet;

use super::Role;

/// An active user together with the patients they are linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub role: Role,
    pub patients: BTreeSet<String>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: user_id.into(), role, patients: BTreeSet::new() }
    }

    pub fn with_patients<I, S>(mut self, patients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patients.extend(patients.into_iter().map(Into::into));
        self
    }

    fn shares_patient_with(&self, other: &Participant) -> bool {
        !self.patients.is_disjoint(&other.patients)
    }
}

/// Admins talk to anyone, employees talk to each other, and everything
/// involving a family member needs a patient in common.
pub fn eligible(a: &Participant, b: &Participant) -> bool {
    if a.user_id == b.user_id {
        return false;
    }

    use Role::*;
    match (a.role, b.role) {
        (Admin, _) | (_, Admin) => true,
        (Employee, Employee) => true,
        (Family, Family) | (Employee, Family) | (Family, Employee) => a.shares_patient_with(b),
    }
}
