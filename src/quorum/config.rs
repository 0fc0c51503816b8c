use crate::ids::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a quorum member's log acknowledgements count toward commit and
/// whether it may vote in elections. Non-voters replicate the log but take no
/// part in majorities; a freshly added server is typically a non-voter until
/// it has caught up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MemberType {
    Voter,
    NonVoter,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum MembershipError {
    #[error("peer {0} is already in the configuration")]
    AlreadyMember(PeerId),
    #[error("peer {0} is not in the configuration")]
    NotAMember(PeerId),
}

/// The membership of one tablet's replica group. Versioned by `opid_index`:
/// the log index of the CONFIG_CHANGE entry that carries this configuration,
/// or 0 for the configuration a tablet was created with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuorumConfig {
    members: BTreeMap<PeerId, MemberType>,
    opid_index: u64,
}

impl QuorumConfig {
    /// The bootstrap configuration for a newly created tablet: all members
    /// are voters, `opid_index` 0.
    pub fn initial(voters: impl IntoIterator<Item = PeerId>) -> Self {
        QuorumConfig {
            members: voters.into_iter().map(|id| (id, MemberType::Voter)).collect(),
            opid_index: 0,
        }
    }

    pub fn opid_index(&self) -> u64 {
        self.opid_index
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.members.contains_key(id)
    }

    pub fn member_type(&self, id: &PeerId) -> Option<MemberType> {
        self.members.get(id).copied()
    }

    pub fn is_voter(&self, id: &PeerId) -> bool {
        self.member_type(id) == Some(MemberType::Voter)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.members.keys()
    }

    pub fn voter_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.members
            .iter()
            .filter(|(_, t)| **t == MemberType::Voter)
            .map(|(id, _)| id)
    }

    pub fn num_voters(&self) -> usize {
        self.voter_ids().count()
    }

    /// The number of voter acknowledgements (self included) that constitutes
    /// a strict majority.
    pub fn majority_size(&self) -> usize {
        (self.num_voters() / 2) + 1
    }

    /// The configuration that results from adding `id`, carried at log index
    /// `opid_index`.
    pub fn with_member_added(
        &self,
        id: PeerId,
        member_type: MemberType,
        opid_index: u64,
    ) -> Result<QuorumConfig, MembershipError> {
        if self.contains(&id) {
            return Err(MembershipError::AlreadyMember(id));
        }
        let mut members = self.members.clone();
        members.insert(id, member_type);
        Ok(QuorumConfig { members, opid_index })
    }

    /// The configuration that results from removing `id`. Removing the
    /// current leader is permitted; it keeps serving until the removal entry
    /// commits, then steps down.
    pub fn with_member_removed(
        &self,
        id: &PeerId,
        opid_index: u64,
    ) -> Result<QuorumConfig, MembershipError> {
        if !self.contains(id) {
            return Err(MembershipError::NotAMember(id.clone()));
        }
        let mut members = self.members.clone();
        members.remove(id);
        Ok(QuorumConfig { members, opid_index })
    }
}
