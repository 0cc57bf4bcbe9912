//! Game State Machine (spec §4.2): role assignment, phase progression,
//! night resolution, voting, and win evaluation.
//!
//! Generalizes the teacher's `Game` (a `Mafia`/`Doctor`/`Detective`
//! `cycle`/`day_num`/`votes` loop with `cast_vote`/`poll_end_cycle`/`end_cycle`)
//! to the full phase graph and role catalog; the shape of those three
//! entry points survives unchanged.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use mafia_protocol::Audience;
use mafia_protocol::DeathCause;
use mafia_protocol::DeathRecord;
use mafia_protocol::Event;
use mafia_protocol::GameOutcome;
use mafia_protocol::GameStateView;
use mafia_protocol::NIGHT_PIPELINE;
use mafia_protocol::NightActionKind;
use mafia_protocol::Phase;
use mafia_protocol::PlayerId;
use mafia_protocol::PlayerStatus;
use mafia_protocol::Role;
use mafia_protocol::RoomSettings;
use mafia_protocol::Team;
use mafia_protocol::TieBreakPolicy;
use mafia_protocol::WinCondition;
use rand::Rng;
use tracing::field;

use crate::clock::Clock;
use crate::consts::RESOLUTION_SAFETY_VALVE_ROUNDS;
use crate::error::MafiaGameError;
use crate::rng::choose;
use crate::rng::shuffle;

/// Buffers for the night currently in progress. Reset at `MafiaAction` entry
/// each night (spec §4.2 "Action intake").
#[derive(Default, Debug, Clone)]
struct NightActions {
    /// Submitter -> target, last write wins per submitter.
    mafia_votes: HashMap<PlayerId, PlayerId>,
    /// Order the first distinct target appeared in, for tie-break.
    mafia_target_order: Vec<PlayerId>,
    don_target: Option<PlayerId>,
    detective_target: Option<PlayerId>,
    doctor_target: Option<PlayerId>,
    bodyguard_target: Option<PlayerId>,
    jailor_target: Option<PlayerId>,
    vigilante_target: Option<PlayerId>,
    spy_target: Option<PlayerId>,
    mafia_healer_target: Option<PlayerId>,
    silencer_target: Option<PlayerId>,
    serial_killer_target: Option<PlayerId>,
    cult_leader_target: Option<PlayerId>,
    /// `Some(p)` douses `p`; a bare ignite submission is represented by
    /// `arsonist_ignite = true` with no new douse target that night.
    arsonist_douse_target: Option<PlayerId>,
    arsonist_ignite: bool,
}

/// State for an active game (spec §3 "Game state").
pub struct Game {
    settings: RoomSettings,
    /// Insertion/seat order, fixed at start.
    players: Vec<PlayerId>,
    role_assignments: HashMap<PlayerId, Role>,
    /// Mutable: Cult Leader conversion flips a target's team mid-game.
    current_team: HashMap<PlayerId, Team>,
    status: HashMap<PlayerId, PlayerStatus>,
    dead: Vec<DeathRecord>,
    phase: Phase,
    day_number: usize,
    phase_deadline: Instant,
    role_deadline: Option<Instant>,
    day_votes: HashMap<PlayerId, Option<PlayerId>>,
    night: NightActions,
    /// Persistent Arsonist douse set, survives across nights (spec §4.2 step 6).
    doused: HashSet<PlayerId>,
    /// Silenced for the next `DayDiscussion`; cleared on entry.
    silenced: HashSet<PlayerId>,
    jailed: Option<PlayerId>,
    vigilante_shots: HashMap<PlayerId, u32>,
    /// Restricts the next `Voting` entry to this single candidate
    /// (spec §4.2 "Forced transitions").
    forced_removal_target: Option<PlayerId>,
    /// Tied candidates from a `random`/`revote` tie-break still in progress.
    revote_candidates: Option<Vec<PlayerId>>,
    pending_outcome: Option<GameOutcome>,
    rounds_resolved: u32,
}

fn composition_table(n: usize) -> (usize, usize, usize, bool, bool) {
    // (mafia, doctor, detective, vigilante_slot_available, bodyguard_slot_available)
    match n {
        3 => (1, 0, 0, false, false),
        4 => (1, 1, 0, false, false),
        5 => (1, 1, 0, false, false),
        6 => (2, 1, 0, false, false),
        7 => (2, 1, 1, false, false),
        8 => (2, 1, 1, false, false),
        9 => (3, 1, 1, false, false),
        10 | 11 => (3, 1, 1, true, false),
        12 | 13 => (4, 1, 1, true, false),
        14 | 15 => (if n == 14 { 4 } else { 5 }, 1, 1, true, true),
        16 | 17 => (5, 1, 1, true, true),
        18 | 19 => (6, 1, 1, true, true),
        20 => (7, 1, 1, true, true),
        _ => unreachable!("n <= 20 handled by caller"),
    }
}

/// Role composition for `n` players (spec §4.2 step 2). Deterministic given
/// `(n, settings)`; the caller shuffles and assigns positionally.
fn compute_composition(n: usize, settings: &RoomSettings) -> HashMap<Role, usize> {
    let (mut mafia, doctor, detective, vig_slot, bodyguard_slot) = if n <= 20 {
        composition_table(n)
    } else {
        let mafia = ((n as f64) * 0.35).ceil() as usize;
        let det_doc = (n as f64 / 15.0).ceil() as usize;
        (mafia, det_doc, det_doc, true, true)
    };

    let vigilante = if vig_slot && settings.enable_vigilante { 1 } else { 0 };
    let bodyguard = if bodyguard_slot && settings.enable_bodyguard { 1 } else { 0 };
    let mut villager = n - mafia - doctor - detective - vigilante - bodyguard;

    let mut counts: HashMap<Role, usize> = HashMap::new();
    counts.insert(Role::Mafia, mafia);
    counts.insert(Role::Doctor, doctor);
    counts.insert(Role::Detective, detective);
    counts.insert(Role::Vigilante, vigilante);
    counts.insert(Role::Bodyguard, bodyguard);

    // Mafia-family promotions consume from the plain `Mafia` count in turn;
    // each is skipped if there aren't enough plain Mafia slots left (spec
    // only specifies Godfather/Mafioso promotion explicitly; Don and the
    // Mafia-team support roles are this crate's supplemented catalog, so
    // they follow the same "promote from the family pool" rule).
    let mut promote = |counts: &mut HashMap<Role, usize>, role: Role| {
        let plain = counts.entry(Role::Mafia).or_insert(0);
        if *plain > 0 {
            *plain -= 1;
            *counts.entry(role).or_insert(0) += 1;
        }
    };

    if settings.enable_godfather {
        promote(&mut counts, Role::Godfather);
        if mafia >= 2 {
            promote(&mut counts, Role::Mafioso);
        }
    }
    if settings.enable_don {
        promote(&mut counts, Role::Don);
    }
    if settings.enable_mafia_healer {
        promote(&mut counts, Role::MafiaHealer);
    }
    if settings.enable_silencer {
        promote(&mut counts, Role::Silencer);
    }

    // Town/Neutral supplemented roles consume from the Villager pool.
    let mut convert_villager = |counts: &mut HashMap<Role, usize>, villager: &mut usize, role: Role| {
        if *villager > 0 {
            *villager -= 1;
            *counts.entry(role).or_insert(0) += 1;
        }
    };

    if settings.enable_jester && n >= 8 {
        convert_villager(&mut counts, &mut villager, Role::Jester);
    }
    if settings.enable_mayor {
        convert_villager(&mut counts, &mut villager, Role::Mayor);
    }
    if settings.enable_spy {
        convert_villager(&mut counts, &mut villager, Role::Spy);
    }
    if settings.enable_serial_killer {
        convert_villager(&mut counts, &mut villager, Role::SerialKiller);
    }
    if settings.enable_cult_leader {
        convert_villager(&mut counts, &mut villager, Role::CultLeader);
    }
    if settings.enable_arsonist {
        convert_villager(&mut counts, &mut villager, Role::Arsonist);
    }

    counts.insert(Role::Villager, villager);
    counts.retain(|_, count| *count > 0);
    counts
}

fn phase_timer_secs(phase: Phase, timers: &mafia_protocol::TimerTable) -> u64 {
    match phase {
        Phase::Lobby => 0,
        Phase::RoleReveal => timers.role_reveal,
        Phase::MafiaAction => timers.mafia_action,
        Phase::DonAction => timers.don_action,
        Phase::DetectiveAction => timers.detective_action,
        Phase::DoctorAction => timers.doctor_action,
        Phase::BodyguardAction => timers.bodyguard_action,
        Phase::JailorAction => timers.jailor_action,
        Phase::VigilanteAction => timers.vigilante_action,
        Phase::SpyAction => timers.spy_action,
        Phase::MafiaHealerAction => timers.mafia_healer_action,
        Phase::SilencerAction => timers.silencer_action,
        Phase::SerialKillerAction => timers.serial_killer_action,
        Phase::CultLeaderAction => timers.cult_leader_action,
        Phase::ArsonistAction => timers.arsonist_action,
        Phase::DayDiscussion => timers.day_discussion,
        Phase::Voting => timers.voting,
        Phase::Resolution => timers.resolution,
        Phase::GameOver => 0,
    }
}

/// The full ordered phase graph, looping from `Resolution` back to the
/// first night phase (spec §4.2 "State graph").
fn full_sequence() -> Vec<Phase> {
    let mut seq = vec![Phase::RoleReveal];
    seq.extend_from_slice(NIGHT_PIPELINE);
    seq.push(Phase::DayDiscussion);
    seq.push(Phase::Voting);
    seq.push(Phase::Resolution);
    seq
}

impl Game {
    #[tracing::instrument(skip_all, fields(num_players = player_ids.len()))]
    pub fn start<R: Rng + ?Sized>(
        settings: RoomSettings,
        mut player_ids: Vec<PlayerId>,
        clock: &dyn Clock,
        rng: &mut R,
    ) -> Result<(Self, Vec<(Audience, Event)>), MafiaGameError> {
        if player_ids.len() < settings.min_players {
            return Err(MafiaGameError::NotEnoughPlayers {
                needed: settings.min_players,
                have: player_ids.len(),
            });
        }
        if player_ids.len() > settings.max_players {
            return Err(MafiaGameError::TooManyPlayers {
                max: settings.max_players,
                have: player_ids.len(),
            });
        }

        // Sort before shuffling so a fixed seed gives a deterministic outcome
        // regardless of join order churn (matches the teacher's
        // `clients.sort()` before `clients.shuffle(&mut seed)`).
        player_ids.sort();
        shuffle(&mut player_ids, rng);

        let composition = compute_composition(player_ids.len(), &settings);
        let mut roles_in_order: Vec<Role> = composition
            .into_iter()
            .flat_map(|(role, count)| std::iter::repeat(role).take(count))
            .collect();
        roles_in_order.sort();

        let mut role_assignments = HashMap::new();
        let mut current_team = HashMap::new();
        for (id, role) in player_ids.iter().zip(roles_in_order) {
            role_assignments.insert(id.clone(), role);
            current_team.insert(id.clone(), role.team());
        }

        let status = player_ids
            .iter()
            .map(|id| (id.clone(), PlayerStatus::Alive))
            .collect();

        let vigilante_shots = role_assignments
            .iter()
            .filter(|(_, role)| **role == Role::Vigilante)
            .map(|(id, _)| (id.clone(), 1))
            .collect();

        let mut game = Game {
            phase_deadline: clock.now() + Duration::from_secs(phase_timer_secs(Phase::RoleReveal, &settings.timers)),
            players: player_ids,
            role_assignments,
            current_team,
            status,
            dead: Vec::new(),
            phase: Phase::RoleReveal,
            day_number: 0,
            role_deadline: None,
            day_votes: HashMap::new(),
            night: NightActions::default(),
            doused: HashSet::new(),
            silenced: HashSet::new(),
            jailed: None,
            vigilante_shots,
            forced_removal_target: None,
            revote_candidates: None,
            pending_outcome: None,
            rounds_resolved: 0,
            settings,
        };

        let mut events = Vec::new();
        for id in game.players.clone() {
            events.push((Audience::Player(id.clone()), Event::GameStarted(game.view_for(&id))));
            events.push((
                Audience::Player(id.clone()),
                Event::GameRoleReveal {
                    role: game.role_assignments[&id],
                    team: game.current_team[&id],
                    teammates: game.teammates_of(&id),
                },
            ));
        }
        events.push((
            Audience::AllInRoom,
            Event::GamePhaseChange {
                phase: game.phase,
                timer_secs: phase_timer_secs(Phase::RoleReveal, &game.settings.timers),
                day_number: game.day_number,
            },
        ));

        Ok((game, events))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    fn is_alive(&self, id: &PlayerId) -> bool {
        self.status.get(id) == Some(&PlayerStatus::Alive)
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.iter().filter(move |id| self.is_alive(id))
    }

    fn role_of(&self, id: &PlayerId) -> Option<Role> {
        self.role_assignments.get(id).copied()
    }

    fn team_of(&self, id: &PlayerId) -> Option<Team> {
        self.current_team.get(id).copied()
    }

    /// All living Mafia-team players other than `id` (spec §4.2 step 5,
    /// used for `game:roleReveal`'s `teammates` field).
    pub fn teammates_of(&self, id: &PlayerId) -> Vec<PlayerId> {
        if self.team_of(id) != Some(Team::Mafia) {
            return Vec::new();
        }
        self.players
            .iter()
            .filter(|other| *other != id && self.team_of(other) == Some(Team::Mafia))
            .cloned()
            .collect()
    }

    /// Computes the admissible target set for `actor`'s action in `phase`
    /// (spec §4.2 "Valid-target sets"). Authoritative: both the
    /// `night:actionRequired` payload and `submit_night_action`'s intake
    /// validation are derived from this same set, so a submission can never
    /// accept a target the client was never shown.
    fn valid_targets_for_actor(&self, phase: Phase, actor: &PlayerId) -> Vec<PlayerId> {
        let others = || self.alive_players().filter(|p| *p != actor);
        match phase {
            // Mafia cannot target their own team (spec §4.2 "KILL/...:
            // Mafia cannot target own team").
            Phase::MafiaAction => others().filter(|p| self.team_of(p) != Some(Team::Mafia)).cloned().collect(),
            Phase::VigilanteAction if self.vigilante_shots.get(actor).copied().unwrap_or(0) == 0 => Vec::new(),
            // `others()` already excludes `actor`, which is what rules out
            // Doctor self-save (spec §4.2 "Doctor cannot self-save").
            _ => others().cloned().collect(),
        }
    }

    /// Builds the private, per-recipient view of the game (spec §3, §4.3).
    pub fn view_for(&self, observer: &PlayerId) -> GameStateView {
        let phase_remaining = 0; // filled in by caller with live clock if needed
        GameStateView {
            phase: self.phase,
            day_number: self.day_number,
            phase_timer_remaining_secs: phase_remaining,
            role_timer_remaining_secs: None,
            alive: self.alive_players().cloned().collect(),
            dead: self.dead.clone(),
            your_role: self.role_of(observer),
            teammates: self.teammates_of(observer),
            votes: self.day_votes.clone(),
            pending_win: self.pending_outcome.clone(),
        }
    }

    fn phase_applicable(&self, phase: Phase) -> bool {
        match phase {
            Phase::MafiaAction => self
                .alive_players()
                .any(|id| self.role_of(id).is_some_and(Role::is_mafia_killer)),
            _ => match phase.acting_role() {
                Some(role) => self.alive_players().any(|id| self.role_of(id) == Some(role)),
                None => true,
            },
        }
    }

    fn enter_phase(&mut self, phase: Phase, clock: &dyn Clock) -> Vec<(Audience, Event)> {
        self.phase = phase;
        let timer = phase_timer_secs(phase, &self.settings.timers);
        self.phase_deadline = clock.now() + Duration::from_secs(timer);
        self.role_deadline = None;

        let mut events = vec![(
            Audience::AllInRoom,
            Event::GamePhaseChange { phase, timer_secs: timer, day_number: self.day_number },
        )];

        if phase == Phase::DayDiscussion {
            self.day_number += 1;
            self.night = NightActions::default();
        }

        if phase == Phase::Voting {
            self.day_votes.clear();
            let candidates = if let Some(target) = self.forced_removal_target.take() {
                vec![target]
            } else if let Some(tied) = &self.revote_candidates {
                tied.clone()
            } else {
                self.alive_players().cloned().collect()
            };
            events.push((
                Audience::Alive,
                Event::VoteStarted { timer_secs: timer, candidates },
            ));
        }

        if let Some(role) = phase.acting_role() {
            self.role_deadline = Some(clock.now() + Duration::from_secs(timer));
            for id in self.alive_players().cloned().collect::<Vec<_>>() {
                if self.role_of(&id) == Some(role) {
                    let targets = self.valid_targets_for_actor(phase, &id);
                    events.push((
                        Audience::Player(id),
                        Event::NightActionRequired { role, timer_secs: timer, valid_targets: targets },
                    ));
                }
            }
        } else if phase == Phase::MafiaAction {
            self.role_deadline = Some(clock.now() + Duration::from_secs(timer));
            for id in self.alive_players().cloned().collect::<Vec<_>>() {
                if self.role_of(&id).is_some_and(Role::is_mafia_killer) {
                    let targets = self.valid_targets_for_actor(phase, &id);
                    events.push((
                        Audience::Player(id),
                        Event::NightActionRequired { role: Role::Mafia, timer_secs: timer, valid_targets: targets },
                    ));
                }
            }
        }

        events
    }

    /// Advances past `from`, skipping night-action phases with no living
    /// eligible role (spec §4.2 "executed only if at least one living
    /// player holds that role").
    fn next_phase_after(&self, from: Phase) -> Phase {
        let seq = full_sequence();
        let idx = seq.iter().position(|p| *p == from);
        let mut candidates = match idx {
            Some(i) if i + 1 < seq.len() => seq[i + 1..].to_vec(),
            _ => Vec::new(),
        };
        if from == Phase::Resolution || candidates.is_empty() {
            // loop back into the night pipeline rather than RoleReveal again
            candidates = NIGHT_PIPELINE
                .iter()
                .copied()
                .chain([Phase::DayDiscussion, Phase::Voting, Phase::Resolution])
                .collect();
        }

        candidates
            .into_iter()
            .find(|p| self.phase_applicable(*p))
            .unwrap_or(Phase::DayDiscussion)
    }

    #[tracing::instrument(skip_all, fields(phase = field::debug(self.phase), actor = %actor))]
    pub fn submit_night_action(
        &mut self,
        actor: &PlayerId,
        target: Option<PlayerId>,
    ) -> Result<Vec<(Audience, Event)>, MafiaGameError> {
        if !self.is_alive(actor) {
            return Err(MafiaGameError::PlayerNotAlive(actor.clone()));
        }
        let role = self
            .role_of(actor)
            .ok_or_else(|| MafiaGameError::NotAuthorized(actor.clone()))?;

        let accepted = match self.phase {
            Phase::MafiaAction => role.is_mafia_killer(),
            phase => phase.acting_role() == Some(role),
        };
        if !accepted {
            return Err(MafiaGameError::InvalidPhase(self.phase));
        }

        if let Some(t) = &target {
            if !self.is_alive(t) {
                return Err(MafiaGameError::InvalidTarget(target.clone()));
            }
            // Re-derive the admissible set server-side rather than trusting
            // the client to only ever submit a target it was shown — the
            // server is the single source of truth for per-phase validity
            // (spec §1, §7 INVALID_TARGET).
            if !self.valid_targets_for_actor(self.phase, actor).contains(t) {
                return Err(MafiaGameError::InvalidTarget(target.clone()));
            }
        }

        let mut extra_events = Vec::new();
        match self.phase {
            Phase::MafiaAction => {
                if let Some(t) = target.clone() {
                    if !self.night.mafia_target_order.contains(&t) {
                        self.night.mafia_target_order.push(t.clone());
                    }
                    self.night.mafia_votes.insert(actor.clone(), t);
                } else {
                    self.night.mafia_votes.remove(actor);
                }
                let votes = self.night.mafia_votes.iter().map(|(voter, target)| (voter.clone(), Some(target.clone()))).collect();
                extra_events.push((Audience::MafiaTeam, Event::MafiaVoteUpdate(votes)));
            }
            Phase::DonAction => self.night.don_target = target.clone(),
            Phase::DetectiveAction => self.night.detective_target = target.clone(),
            Phase::DoctorAction => self.night.doctor_target = target.clone(),
            Phase::BodyguardAction => self.night.bodyguard_target = target.clone(),
            Phase::JailorAction => self.night.jailor_target = target.clone(),
            Phase::VigilanteAction => {
                self.night.vigilante_target = target.clone();
                if target.is_some() {
                    *self.vigilante_shots.entry(actor.clone()).or_insert(0) -= 1;
                }
            }
            Phase::SpyAction => self.night.spy_target = target.clone(),
            Phase::MafiaHealerAction => self.night.mafia_healer_target = target.clone(),
            Phase::SilencerAction => self.night.silencer_target = target.clone(),
            Phase::SerialKillerAction => self.night.serial_killer_target = target.clone(),
            Phase::CultLeaderAction => self.night.cult_leader_target = target.clone(),
            Phase::ArsonistAction => match &target {
                Some(t) => self.night.arsonist_douse_target = Some(t.clone()),
                None => self.night.arsonist_ignite = true,
            },
            _ => return Err(MafiaGameError::InvalidPhase(self.phase)),
        }

        let kind = role.night_action().unwrap_or(NightActionKind::Kill);
        extra_events.push((Audience::Player(actor.clone()), Event::NightActionConfirmed { action_type: kind }));
        Ok(extra_events)
    }

    #[tracing::instrument(skip_all, fields(phase = field::debug(self.phase), voter = %voter, target = field::debug(&target)))]
    pub fn cast_vote<R: Rng + ?Sized>(
        &mut self,
        voter: &PlayerId,
        target: Option<PlayerId>,
        clock: &dyn Clock,
        rng: &mut R,
    ) -> Result<Vec<(Audience, Event)>, MafiaGameError> {
        if self.phase != Phase::Voting {
            return Err(MafiaGameError::InvalidPhase(self.phase));
        }
        if !self.is_alive(voter) {
            return Err(MafiaGameError::PlayerNotAlive(voter.clone()));
        }
        if let Some(t) = &target {
            if !self.is_alive(t) {
                return Err(MafiaGameError::InvalidTarget(target.clone()));
            }
            if let Some(candidates) = &self.revote_candidates {
                if !candidates.contains(t) {
                    return Err(MafiaGameError::InvalidTarget(target.clone()));
                }
            }
        }

        self.day_votes.insert(voter.clone(), target);

        let mut events = vec![(
            Audience::Alive,
            Event::VoteUpdate { votes: self.day_votes.clone(), has_voted: true },
        )];

        if self.day_votes.len() == self.alive_players().count() {
            events.extend(self.tally_votes(clock, rng));
        }

        Ok(events)
    }

    /// Host-only forced transition into an early `Voting` restricted to one
    /// target (spec §4.2 "Forced transitions").
    pub fn request_removal_vote(&mut self, target: PlayerId) -> Result<(), MafiaGameError> {
        if self.phase != Phase::DayDiscussion {
            return Err(MafiaGameError::InvalidPhase(self.phase));
        }
        if !self.is_alive(&target) {
            return Err(MafiaGameError::InvalidTarget(Some(target)));
        }
        self.forced_removal_target = Some(target);
        Ok(())
    }

    fn weighted_tally(&self) -> HashMap<PlayerId, u32> {
        let mut tally = HashMap::new();
        for (voter, target) in &self.day_votes {
            if let Some(target) = target {
                let weight = self.role_of(voter).map(Role::vote_weight).unwrap_or(1);
                *tally.entry(target.clone()).or_insert(0) += weight;
            }
        }
        tally
    }

    /// Tallies the day's votes and resolves the outcome (spec §4.2
    /// "Voting"): a clear leader is eliminated, a tie with no configured
    /// policy eliminates nobody, and a tied `Revote` re-enters `Voting`
    /// restricted to the tied candidates exactly once before falling back to
    /// no elimination (spec §9 Open Question: "Mafia tie-break policy",
    /// resolved in DESIGN.md). Always leaves the game in `Resolution` (or
    /// `GameOver`, or a fresh restricted `Voting` round) by the time it
    /// returns, so the caller never needs a follow-up transition.
    fn tally_votes<R: Rng + ?Sized>(&mut self, clock: &dyn Clock, rng: &mut R) -> Vec<(Audience, Event)> {
        let tally = self.weighted_tally();
        let max = tally.values().copied().max().unwrap_or(0);
        let leaders: Vec<PlayerId> = tally
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(id, _)| id.clone())
            .collect();

        let already_revoted = self.revote_candidates.take().is_some();
        let mut events = Vec::new();

        let eliminated = if max == 0 {
            None
        } else if leaders.len() == 1 {
            Some(leaders[0].clone())
        } else {
            match self.settings.tie_break {
                TieBreakPolicy::NoElimination => None,
                TieBreakPolicy::Random => choose(&leaders, rng).cloned(),
                TieBreakPolicy::Revote if !already_revoted => {
                    self.revote_candidates = Some(leaders.clone());
                    events.push((
                        Audience::AllInRoom,
                        Event::VoteResult { eliminated_id: None, eliminated_role: None, vote_counts: tally },
                    ));
                    events.extend(self.enter_phase(Phase::Voting, clock));
                    return events;
                }
                // already re-voted once and still tied: settle for no elimination.
                TieBreakPolicy::Revote => None,
            }
        };

        events.push((
            Audience::AllInRoom,
            Event::VoteResult {
                eliminated_id: eliminated.clone(),
                eliminated_role: eliminated.as_ref().and_then(|id| self.role_of(id)),
                vote_counts: tally,
            },
        ));

        if let Some(id) = eliminated {
            events.extend(self.eliminate(id, DeathCause::Vote));
        }

        if self.phase != Phase::GameOver {
            events.extend(self.enter_phase(Phase::Resolution, clock));
        }

        events
    }

    /// Marks a player dead, reveals role per settings, checks the Jester
    /// short-circuit, and re-evaluates win conditions.
    fn eliminate(&mut self, id: PlayerId, cause: DeathCause) -> Vec<(Audience, Event)> {
        let role = self.role_of(&id);
        self.status.insert(id.clone(), PlayerStatus::Dead);
        self.dead.push(DeathRecord {
            player: id.clone(),
            role: if self.settings.reveal_role_on_death { role } else { None },
            cause,
        });

        let mut events = vec![(
            Audience::AllInRoom,
            Event::PlayerEliminated {
                player_id: id.clone(),
                role: if self.settings.reveal_role_on_death { role } else { None },
                reason: cause,
            },
        )];

        if cause == DeathCause::Vote && role == Some(Role::Jester) {
            // JESTER_WINS overrides any other evaluation for this cycle
            // (spec §4.2 "JESTER_WINS... overrides others for that cycle").
            let outcome = GameOutcome {
                condition: WinCondition::JesterWins,
                winning_team: Some(Team::Neutral),
                winning_players: vec![id],
            };
            self.pending_outcome = Some(outcome.clone());
            self.phase = Phase::GameOver;
            events.push((Audience::AllInRoom, outcome.into()));
        }

        events
    }

    /// Runs night resolution (spec §4.2 steps 1-8), then transitions.
    fn resolve_night(&mut self) -> Vec<(Audience, Event)> {
        let mut events = Vec::new();

        // Night-long effects from the previous cycle expire once this
        // night's resolution begins, so last night's silence covers the
        // full day that followed it (spec §4.2 "silences... the
        // immediately following day").
        self.silenced.clear();

        // 1. Jailor nullification: every submitted action by the jailed
        // player is voided, with no role carve-out (spec §4.2 step 1).
        self.jailed = self.night.jailor_target.clone();
        if let Some(jailed) = self.jailed.take() {
            self.night.mafia_votes.remove(&jailed);
            self.night.mafia_target_order.retain(|p| *p != jailed);
            if self.night.don_target == Some(jailed.clone()) {
                self.night.don_target = None;
            }
            if self.night.detective_target == Some(jailed.clone()) {
                self.night.detective_target = None;
            }
            if self.night.doctor_target == Some(jailed.clone()) {
                self.night.doctor_target = None;
            }
            if self.night.bodyguard_target == Some(jailed.clone()) {
                self.night.bodyguard_target = None;
            }
            if self.night.vigilante_target == Some(jailed.clone()) {
                self.night.vigilante_target = None;
            }
            if self.night.spy_target == Some(jailed.clone()) {
                self.night.spy_target = None;
            }
            if self.night.mafia_healer_target == Some(jailed.clone()) {
                self.night.mafia_healer_target = None;
            }
            if self.night.silencer_target == Some(jailed.clone()) {
                self.night.silencer_target = None;
            }
            if self.night.serial_killer_target == Some(jailed.clone()) {
                self.night.serial_killer_target = None;
            }
            if self.night.cult_leader_target == Some(jailed.clone()) {
                self.night.cult_leader_target = None;
            }
            if self.night.arsonist_douse_target == Some(jailed.clone()) {
                self.night.arsonist_douse_target = None;
            }
            if self.role_of(&jailed) == Some(Role::Arsonist) {
                self.night.arsonist_ignite = false;
            }
        }

        // 2. Cult Leader conversion.
        if let Some(target) = self.night.cult_leader_target.clone() {
            self.current_team.insert(target, Team::Neutral);
        }

        // 3. Silencer.
        if let Some(target) = self.night.silencer_target.clone() {
            self.silenced.insert(target);
        }

        // 4. Protect set.
        let mut protected: HashSet<PlayerId> = HashSet::new();
        if let Some(t) = &self.night.doctor_target {
            protected.insert(t.clone());
        }
        if let Some(t) = &self.night.mafia_healer_target {
            protected.insert(t.clone());
        }
        let bodyguard_watch = self.night.bodyguard_target.clone();

        // 5. Kill set. Each attempt optionally names the single living
        // attacker behind it, for the Bodyguard trade below — team kills
        // (Mafia) and delayed ones (Arsonist) have no one attacker to name.
        let mafia_target = self.resolve_mafia_kill_target();
        let mut someone_saved = false;
        let mut deaths: Vec<(PlayerId, DeathCause)> = Vec::new();
        let mut kill_attempts: Vec<(PlayerId, DeathCause, Option<PlayerId>)> = Vec::new();
        if let Some(t) = mafia_target {
            kill_attempts.push((t, DeathCause::MafiaKill, None));
        }
        if let Some(t) = self.night.vigilante_target.clone() {
            kill_attempts.push((t, DeathCause::Vigilante, self.vigilante_id()));
        }
        if let Some(t) = self.night.serial_killer_target.clone() {
            kill_attempts.push((t, DeathCause::SerialKiller, self.serial_killer_id()));
        }
        if self.night.arsonist_ignite {
            for t in self.doused.drain().collect::<Vec<_>>() {
                kill_attempts.push((t, DeathCause::Arsonist, None));
            }
        }

        for (target, cause, attacker) in kill_attempts {
            if !self.is_alive(&target) {
                continue;
            }
            if protected.contains(&target) {
                someone_saved = true;
                continue;
            }
            if bodyguard_watch.as_ref() == Some(&target) {
                // The Bodyguard trades their own life for the principal's;
                // the protected target survives, and the attacker dies too
                // when one can be named (spec §4.2 step 5 "mutual").
                if let Some(guard) = self.bodyguard_id() {
                    deaths.push((guard, DeathCause::BodyguardTrade));
                }
                if let Some(attacker) = attacker {
                    deaths.push((attacker, DeathCause::BodyguardTrade));
                }
                someone_saved = true;
                continue;
            }
            deaths.push((target, cause));
        }

        // 6. Arsonist douse (new target this night).
        if let Some(t) = self.night.arsonist_douse_target.take() {
            self.doused.insert(t);
        }

        // 7. Investigation results.
        if let Some(target) = self.night.detective_target.clone() {
            let role = self.role_of(&target);
            let is_guilty = role.is_some_and(|r| r.team() == Team::Mafia && !r.appears_innocent_to_detective());
            events.push((Audience::Player(self.detective_id().unwrap_or(target.clone())), Event::NightDetectiveResult { target_id: target, is_guilty }));
        }
        if let Some(target) = self.night.don_target.clone() {
            let is_detective = self.role_of(&target) == Some(Role::Detective);
            events.push((Audience::Player(self.don_id().unwrap_or(target.clone())), Event::NightDonResult { target_id: target, is_detective }));
        }
        if self.night.spy_target.is_some() {
            let mafia_voters: Vec<PlayerId> = self.night.mafia_votes.keys().cloned().collect();
            events.push((Audience::MafiaTeam, Event::NightSpyResult { mafia_voters }));
        }

        // 8. Apply deaths and emit night:result.
        let dedup_targets: HashSet<PlayerId> = deaths.iter().map(|(id, _)| id.clone()).collect();
        for id in dedup_targets {
            let cause = deaths.iter().find(|(d, _)| *d == id).map(|(_, c)| *c).unwrap_or(DeathCause::MafiaKill);
            events.extend(self.eliminate(id, cause));
        }

        events.push((
            Audience::AllInRoom,
            Event::NightResult { deaths, someone_saved },
        ));

        self.night = NightActions::default();
        events
    }

    fn resolve_mafia_kill_target(&self) -> Option<PlayerId> {
        if self.night.mafia_votes.is_empty() {
            return None;
        }
        let mut tally: HashMap<PlayerId, u32> = HashMap::new();
        for target in self.night.mafia_votes.values() {
            *tally.entry(target.clone()).or_insert(0) += 1;
        }
        let max = *tally.values().max().unwrap_or(&0);
        let mut leaders: Vec<PlayerId> = self
            .night
            .mafia_target_order
            .iter()
            .filter(|t| tally.get(*t).copied().unwrap_or(0) == max)
            .cloned()
            .collect();
        if leaders.len() == 1 {
            return leaders.pop();
        }

        // Godfather's own choice breaks the tie next.
        if let Some(godfather) = self.players.iter().find(|id| self.role_of(id) == Some(Role::Godfather)) {
            if let Some(choice) = self.night.mafia_votes.get(godfather) {
                if leaders.contains(choice) {
                    return Some(choice.clone());
                }
            }
        }

        leaders.into_iter().next()
    }

    fn bodyguard_id(&self) -> Option<PlayerId> {
        self.players.iter().find(|id| self.is_alive(id) && self.role_of(id) == Some(Role::Bodyguard)).cloned()
    }

    fn vigilante_id(&self) -> Option<PlayerId> {
        self.players.iter().find(|id| self.is_alive(id) && self.role_of(id) == Some(Role::Vigilante)).cloned()
    }

    fn serial_killer_id(&self) -> Option<PlayerId> {
        self.players.iter().find(|id| self.is_alive(id) && self.role_of(id) == Some(Role::SerialKiller)).cloned()
    }

    fn detective_id(&self) -> Option<PlayerId> {
        self.players.iter().find(|id| self.role_of(id) == Some(Role::Detective)).cloned()
    }

    fn don_id(&self) -> Option<PlayerId> {
        self.players.iter().find(|id| self.role_of(id) == Some(Role::Don)).cloned()
    }

    fn evaluate_win(&self) -> Option<GameOutcome> {
        let alive: Vec<&PlayerId> = self.alive_players().collect();
        if alive.is_empty() {
            return Some(GameOutcome { condition: WinCondition::Draw, winning_team: None, winning_players: Vec::new() });
        }
        if alive.len() == 1 && self.role_of(alive[0]) == Some(Role::SerialKiller) {
            return Some(GameOutcome {
                condition: WinCondition::SerialKillerWins,
                winning_team: Some(Team::Neutral),
                winning_players: vec![alive[0].clone()],
            });
        }

        let mafia_alive = alive.iter().filter(|id| self.team_of(id) == Some(Team::Mafia)).count();
        let hostile_neutral_alive = alive.iter().any(|id| self.role_of(id).is_some_and(Role::is_hostile_neutral));

        if mafia_alive == 0 && !hostile_neutral_alive {
            let winners = alive.iter().filter(|id| self.team_of(id) == Some(Team::Town)).map(|id| (*id).clone()).collect();
            return Some(GameOutcome { condition: WinCondition::TownWins, winning_team: Some(Team::Town), winning_players: winners });
        }

        if mafia_alive >= alive.len() - mafia_alive && !hostile_neutral_alive {
            let winners = alive.iter().filter(|id| self.team_of(id) == Some(Team::Mafia)).map(|id| (*id).clone()).collect();
            return Some(GameOutcome { condition: WinCondition::MafiaWins, winning_team: Some(Team::Mafia), winning_players: winners });
        }

        None
    }

    /// Called periodically by the owning room's command loop (spec §5
    /// "Timers"): checks phase/role timer expiry and drives transitions.
    #[tracing::instrument(skip_all, fields(phase = field::debug(self.phase)))]
    pub fn poll_tick<R: Rng + ?Sized>(
        &mut self,
        clock: &dyn Clock,
        rng: &mut R,
    ) -> Vec<(Audience, Event)> {
        if self.phase == Phase::GameOver {
            return Vec::new();
        }

        let now = clock.now();

        if now < self.phase_deadline {
            // Still counting down: just report remaining time (spec §4.2
            // "Both tick at 1 Hz and emit a tick event"), no transition yet.
            let mut events = vec![(
                Audience::AllInRoom,
                Event::TimerUpdate {
                    remaining_secs: self.phase_deadline.saturating_duration_since(now).as_secs(),
                    phase: self.phase,
                },
            )];
            if let Some(role_deadline) = self.role_deadline {
                let remaining_secs = role_deadline.saturating_duration_since(now).as_secs();
                let audience = if self.phase == Phase::MafiaAction {
                    Some((Audience::MafiaTeam, Role::Mafia))
                } else {
                    self.phase.acting_role().map(|role| (Audience::Role(role), role))
                };
                if let Some((audience, for_role)) = audience {
                    events.push((audience, Event::TimerRoleSpecific { remaining_secs, for_role }));
                }
            }
            return events;
        }

        let mut events = vec![(
            Audience::AllInRoom,
            Event::TimerUpdate { remaining_secs: 0, phase: self.phase },
        )];

        match self.phase {
            Phase::Voting => {
                // tally_votes leaves the game in Resolution, GameOver, or a
                // fresh restricted Voting round on its own.
                events.extend(self.tally_votes(clock, rng));
                return events;
            }
            Phase::Resolution => {
                events.extend(self.finish_resolution(clock));
                return events;
            }
            _ if NIGHT_PIPELINE.contains(&self.phase) => {
                // a role phase timing out means non-submitters are treated
                // as having passed; nothing further to collect here.
                let next = self.next_phase_after(self.phase);
                if next == Phase::DayDiscussion {
                    // night resolution (spec §4.2 steps 1-8) runs once, right
                    // as the night pipeline hands off to the day, not as its
                    // own named phase in the state graph.
                    events.extend(self.resolve_night());
                    if let Some(outcome) = self.evaluate_win() {
                        self.pending_outcome = Some(outcome.clone());
                        self.phase = Phase::GameOver;
                        events.push((Audience::AllInRoom, outcome.into()));
                        return events;
                    }
                }
                events.extend(self.enter_phase(next, clock));
            }
            _ => {
                let next = self.next_phase_after(self.phase);
                events.extend(self.enter_phase(next, clock));
            }
        }

        events
    }

    fn finish_resolution(&mut self, clock: &dyn Clock) -> Vec<(Audience, Event)> {
        let mut events = Vec::new();
        self.rounds_resolved += 1;

        if let Some(outcome) = self.evaluate_win() {
            self.pending_outcome = Some(outcome.clone());
            self.phase = Phase::GameOver;
            events.push((Audience::AllInRoom, outcome.into()));
            return events;
        }

        if self.rounds_resolved >= RESOLUTION_SAFETY_VALVE_ROUNDS {
            tracing::error!(rounds = self.rounds_resolved, "game exceeded safety valve, forcing draw");
            let outcome = GameOutcome { condition: WinCondition::Draw, winning_team: None, winning_players: Vec::new() };
            self.pending_outcome = Some(outcome.clone());
            self.phase = Phase::GameOver;
            events.push((Audience::AllInRoom, outcome.into()));
            return events;
        }

        let next = self.next_phase_after(Phase::Resolution);
        events.extend(self.enter_phase(next, clock));
        events
    }

    /// Mid-game departure: mark dead with cause `LEAVE` (spec §4.2 "Player
    /// departure mid-game").
    pub fn handle_departure(&mut self, id: &PlayerId) -> Vec<(Audience, Event)> {
        if !self.is_alive(id) {
            return Vec::new();
        }
        self.eliminate(id.clone(), DeathCause::Leave)
    }

    pub fn is_silenced(&self, id: &PlayerId) -> bool {
        self.silenced.contains(id)
    }

    pub fn team_of_public(&self, id: &PlayerId) -> Option<Team> {
        self.team_of(id)
    }

    pub fn role_of_public(&self, id: &PlayerId) -> Option<Role> {
        self.role_of(id)
    }

    pub fn record(&self, room_name: std::sync::Arc<str>, duration_secs: u64) -> mafia_protocol::GameRecord {
        mafia_protocol::GameRecord {
            room_name,
            participants: self.players.clone(),
            roles: self.role_assignments.clone(),
            winner: self.pending_outcome.as_ref().and_then(|o| o.winning_team),
            winning_players: self.pending_outcome.as_ref().map(|o| o.winning_players.clone()).unwrap_or_default(),
            duration_secs,
            day_count: self.day_number,
        }
    }
}
