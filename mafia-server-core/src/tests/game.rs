use std::time::Duration;

use mafia_protocol::Audience;
use mafia_protocol::DeathCause;
use mafia_protocol::Event;
use mafia_protocol::Phase;
use mafia_protocol::PlayerId;
use mafia_protocol::Role;
use mafia_protocol::RoomSettings;
use mafia_protocol::Team;
use mafia_protocol::TieBreakPolicy;
use mafia_protocol::WinCondition;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::clock::Clock;
use crate::clock::TestClock;
use crate::error::MafiaGameError;
use crate::game::Game;

fn players(n: usize) -> Vec<PlayerId> {
    (0..n).map(|i| PlayerId::new(format!("p{i}"))).collect()
}

fn start(n: usize, settings: RoomSettings, clock: &dyn Clock, seed: u64) -> Game {
    let (game, _events) = Game::start(settings, players(n), clock, &mut StdRng::seed_from_u64(seed)).unwrap();
    game
}

fn default_settings(min: usize, max: usize) -> RoomSettings {
    RoomSettings { min_players: min, max_players: max, ..RoomSettings::default() }
}

fn mafia_of(game: &Game, ids: &[PlayerId]) -> PlayerId {
    ids.iter()
        .find(|id| game.team_of_public(id) == Some(Team::Mafia))
        .cloned()
        .expect("a started game always assigns at least one mafia")
}

fn role_holder(game: &Game, ids: &[PlayerId], role: Role) -> Option<PlayerId> {
    ids.iter().find(|id| game.role_of_public(id) == Some(role)).cloned()
}

/// Jumps `clock` far past any phase deadline and drives one `poll_tick`.
/// Each call advances the state machine by exactly one transition; callers
/// loop until the phase they're after is reached.
fn tick(game: &mut Game, clock: &TestClock, rng: &mut StdRng) -> Vec<(mafia_protocol::Audience, Event)> {
    clock.advance(Duration::from_secs(600));
    let events = game.poll_tick(clock, rng);
    assert!(!events.is_empty(), "poll_tick produced no events after the deadline elapsed");
    events
}

fn run_to_phase(game: &mut Game, clock: &TestClock, rng: &mut StdRng, phase: Phase) {
    let mut guard = 0;
    while game.phase() != phase && !game.is_over() {
        tick(game, clock, rng);
        guard += 1;
        assert!(guard < 32, "state machine never reached {phase:?}");
    }
}

#[test_log::test]
fn start_rejects_too_few_players() {
    let clock = TestClock::new();
    let mut rng = StdRng::seed_from_u64(1);
    let result = Game::start(default_settings(3, 20), players(2), &clock, &mut rng);
    assert!(matches!(result, Err(MafiaGameError::NotEnoughPlayers { needed: 3, have: 2 })));
}

#[test_log::test]
fn start_rejects_too_many_players() {
    let clock = TestClock::new();
    let mut rng = StdRng::seed_from_u64(1);
    let result = Game::start(default_settings(3, 4), players(5), &clock, &mut rng);
    assert!(matches!(result, Err(MafiaGameError::TooManyPlayers { max: 4, have: 5 })));
}

#[test_log::test]
fn start_assigns_exactly_one_mafia_and_one_doctor_for_four_players() {
    let clock = TestClock::new();
    let ids = players(4);
    let game = start(4, default_settings(3, 20), &clock, 7);

    let mafia_count = ids.iter().filter(|id| game.role_of_public(id) == Some(Role::Mafia)).count();
    let doctor_count = ids.iter().filter(|id| game.role_of_public(id) == Some(Role::Doctor)).count();
    let villager_count = ids.iter().filter(|id| game.role_of_public(id) == Some(Role::Villager)).count();

    assert_eq!(mafia_count, 1);
    assert_eq!(doctor_count, 1);
    assert_eq!(villager_count, 2);
    assert_eq!(game.phase(), Phase::RoleReveal);
    assert!(game.teammates_of(&mafia_of(&game, &ids)).is_empty());
}

#[test_log::test]
fn vigilante_shot_is_single_use() {
    let clock = TestClock::new();
    let ids = players(10);
    let mut settings = default_settings(3, 20);
    settings.enable_vigilante = true;
    let mut game = start(10, settings, &clock, 3);
    let mut rng = StdRng::seed_from_u64(3);

    let Some(vig) = role_holder(&game, &ids, Role::Vigilante) else { return };

    run_to_phase(&mut game, &clock, &mut rng, Phase::VigilanteAction);
    if game.is_over() {
        return;
    }

    let target = ids.iter().find(|id| **id != vig).cloned().unwrap();
    game.submit_night_action(&vig, Some(target.clone())).unwrap();

    // The shot is already spent: a second submission in the same phase is rejected.
    let err = game.submit_night_action(&vig, Some(target));
    assert!(matches!(err, Err(MafiaGameError::InvalidTarget(_))));
}

#[test_log::test]
fn night_resolution_runs_once_before_day_discussion_is_entered() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 11);
    let mut rng = StdRng::seed_from_u64(11);

    let mafia = mafia_of(&game, &ids);
    let doctor = role_holder(&game, &ids, Role::Doctor).expect("doctor present at n=4");
    let victim = ids.iter().find(|id| **id != mafia && **id != doctor).cloned().unwrap();

    tick(&mut game, &clock, &mut rng); // RoleReveal -> MafiaAction
    assert_eq!(game.phase(), Phase::MafiaAction);
    game.submit_night_action(&mafia, Some(victim.clone())).unwrap();

    tick(&mut game, &clock, &mut rng); // MafiaAction -> DoctorAction
    assert_eq!(game.phase(), Phase::DoctorAction);

    let doctor_target = ids.iter().find(|id| **id != victim && **id != doctor).cloned().unwrap();
    game.submit_night_action(&doctor, Some(doctor_target)).unwrap();

    // DoctorAction was the last enabled night phase: this single tick must
    // run night resolution (the mafia kill lands) and only then enter Day.
    let events = tick(&mut game, &clock, &mut rng);
    assert!(
        events.iter().any(|(_, e)| matches!(e, Event::NightResult { .. })),
        "night resolution must run as the night pipeline hands off to the day"
    );

    if !game.is_over() {
        assert_eq!(game.phase(), Phase::DayDiscussion);
        assert!(game.view_for(&victim).dead.iter().any(|d| d.player == victim));
        assert!(!game.alive_players().any(|id| *id == victim));
    }
}

#[test_log::test]
fn doctor_save_prevents_the_mafia_kill() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 23);
    let mut rng = StdRng::seed_from_u64(23);

    let mafia = mafia_of(&game, &ids);
    let doctor = role_holder(&game, &ids, Role::Doctor).expect("doctor present at n=4");
    let victim = ids.iter().find(|id| **id != mafia && **id != doctor).cloned().unwrap();

    tick(&mut game, &clock, &mut rng); // -> MafiaAction
    game.submit_night_action(&mafia, Some(victim.clone())).unwrap();

    tick(&mut game, &clock, &mut rng); // -> DoctorAction
    game.submit_night_action(&doctor, Some(victim.clone())).unwrap();

    let events = tick(&mut game, &clock, &mut rng); // -> DayDiscussion
    let (deaths, someone_saved) = events
        .iter()
        .find_map(|(_, e)| match e {
            Event::NightResult { deaths, someone_saved } => Some((deaths.clone(), *someone_saved)),
            _ => None,
        })
        .expect("night result must be emitted");

    assert!(someone_saved);
    assert!(deaths.is_empty());
    assert!(game.alive_players().any(|id| *id == victim));
}

#[test_log::test]
fn vote_elimination_transitions_straight_to_resolution() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 42);
    let mut rng = StdRng::seed_from_u64(42);

    run_to_phase(&mut game, &clock, &mut rng, Phase::DayDiscussion);
    assert!(!game.is_over(), "an uncontested night shouldn't end a 4-player game");

    tick(&mut game, &clock, &mut rng); // DayDiscussion -> Voting
    assert_eq!(game.phase(), Phase::Voting);

    let target = ids[0].clone();
    for voter in &ids {
        game.cast_vote(voter, Some(target.clone()), &clock, &mut rng).unwrap();
    }

    // All alive voted: cast_vote tallies immediately, without waiting on the timer.
    assert_eq!(game.phase(), Phase::Resolution);
    assert!(!game.alive_players().any(|id| *id == target));

    tick(&mut game, &clock, &mut rng); // Resolution -> next night (or GameOver)
    assert!(game.is_over() || game.phase() != Phase::Resolution);
}

#[test_log::test]
fn tie_break_no_elimination_keeps_everyone_alive() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut settings = default_settings(3, 20);
    settings.tie_break = TieBreakPolicy::NoElimination;
    let mut game = start(4, settings, &clock, 5);
    let mut rng = StdRng::seed_from_u64(5);

    run_to_phase(&mut game, &clock, &mut rng, Phase::Voting);
    assert!(!game.is_over());

    // A clean 2-2 split: no single leader.
    game.cast_vote(&ids[0], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[1], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[2], Some(ids[0].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[3], Some(ids[0].clone()), &clock, &mut rng).unwrap();

    assert_eq!(game.phase(), Phase::Resolution);
    assert_eq!(game.alive_players().count(), 4);
}

#[test_log::test]
fn tie_break_revote_restricts_the_second_ballot_to_the_tied_pair() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut settings = default_settings(3, 20);
    settings.tie_break = TieBreakPolicy::Revote;
    let mut game = start(4, settings, &clock, 9);
    let mut rng = StdRng::seed_from_u64(9);

    run_to_phase(&mut game, &clock, &mut rng, Phase::Voting);
    assert!(!game.is_over());

    game.cast_vote(&ids[0], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[1], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[2], Some(ids[0].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[3], Some(ids[0].clone()), &clock, &mut rng).unwrap();

    // Tied 2-2 with Revote: a fresh Voting round restricted to {ids[0], ids[2]}.
    assert_eq!(game.phase(), Phase::Voting);
    assert_eq!(game.alive_players().count(), 4);

    let err = game.cast_vote(&ids[0], Some(ids[1].clone()), &clock, &mut rng);
    assert!(matches!(err, Err(MafiaGameError::InvalidTarget(_))), "only the tied pair is a valid target on the revote");

    game.cast_vote(&ids[0], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[1], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[2], Some(ids[2].clone()), &clock, &mut rng).unwrap();
    game.cast_vote(&ids[3], Some(ids[2].clone()), &clock, &mut rng).unwrap();

    assert_eq!(game.phase(), Phase::Resolution);
    assert!(!game.alive_players().any(|id| *id == ids[2]));
}

#[test_log::test]
fn mafia_wins_once_they_no_longer_are_outnumbered() {
    let clock = TestClock::new();
    let ids = players(3);
    let mut game = start(3, default_settings(3, 20), &clock, 2);
    let mut rng = StdRng::seed_from_u64(2);
    let mafia = mafia_of(&game, &ids);

    tick(&mut game, &clock, &mut rng); // RoleReveal -> MafiaAction
    assert_eq!(game.phase(), Phase::MafiaAction);

    let victim = ids.iter().find(|id| **id != mafia).cloned().unwrap();
    game.submit_night_action(&mafia, Some(victim)).unwrap();

    // n=3 has no doctor/detective: MafiaAction is the only night phase.
    tick(&mut game, &clock, &mut rng);

    assert!(game.is_over());
    assert_eq!(game.alive_players().count(), 2);
    let outcome = game.view_for(&mafia).pending_win.expect("game over leaves a pending outcome");
    assert_eq!(outcome.condition, WinCondition::MafiaWins);
    assert_eq!(outcome.winning_team, Some(Team::Mafia));
    assert_eq!(outcome.winning_players, vec![mafia]);
}

#[test_log::test]
fn detective_investigation_reports_godfather_as_innocent() {
    let clock = TestClock::new();
    let ids = players(9);
    let mut settings = default_settings(3, 20);
    settings.enable_godfather = true;
    let mut game = start(9, settings, &clock, 13);
    let mut rng = StdRng::seed_from_u64(13);

    let Some(godfather) = role_holder(&game, &ids, Role::Godfather) else { return };
    let Some(detective) = role_holder(&game, &ids, Role::Detective) else { return };

    run_to_phase(&mut game, &clock, &mut rng, Phase::DetectiveAction);
    if game.is_over() {
        return;
    }

    game.submit_night_action(&detective, Some(godfather.clone())).unwrap();

    let mut guard = 0;
    let result = loop {
        let events = tick(&mut game, &clock, &mut rng);
        if let Some((_, Event::NightDetectiveResult { target_id, is_guilty })) =
            events.iter().find(|(_, e)| matches!(e, Event::NightDetectiveResult { .. }))
        {
            break Some((target_id.clone(), *is_guilty));
        }
        if game.is_over() {
            break None;
        }
        guard += 1;
        assert!(guard < 32, "night resolution never ran");
    };

    if let Some((target_id, is_guilty)) = result {
        assert_eq!(target_id, godfather);
        assert!(!is_guilty, "Godfather must appear innocent to detective-style investigation");
    }
}

#[test_log::test]
fn poll_tick_before_deadline_reports_remaining_time_without_transitioning() {
    let clock = TestClock::new();
    let mut game = start(4, default_settings(3, 20), &clock, 31);
    let mut rng = StdRng::seed_from_u64(31);

    clock.advance(Duration::from_secs(4));
    let events = game.poll_tick(&clock, &mut rng);

    assert_eq!(game.phase(), Phase::RoleReveal, "a tick before the deadline must not transition the phase");
    let remaining = events.iter().find_map(|(_, e)| match e {
        Event::TimerUpdate { remaining_secs, phase: Phase::RoleReveal } => Some(*remaining_secs),
        _ => None,
    });
    assert_eq!(remaining, Some(6), "role_reveal's 10s timer minus the 4s elapsed");
}

#[test_log::test]
fn mafia_action_submission_broadcasts_a_live_vote_update_to_the_mafia_team() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 11);
    let mut rng = StdRng::seed_from_u64(11);

    let mafia = mafia_of(&game, &ids);
    let victim = ids.iter().find(|id| **id != mafia).cloned().unwrap();

    tick(&mut game, &clock, &mut rng); // RoleReveal -> MafiaAction
    let events = game.submit_night_action(&mafia, Some(victim.clone())).unwrap();

    let votes = events.iter().find_map(|(audience, e)| match (audience, e) {
        (Audience::MafiaTeam, Event::MafiaVoteUpdate(votes)) => Some(votes.clone()),
        _ => None,
    });
    let votes = votes.expect("mafia action submission must broadcast a live vote tally to the mafia team");
    assert_eq!(votes.get(&mafia), Some(&Some(victim)));
}

#[test_log::test]
fn departed_player_is_marked_dead_with_leave_cause_exactly_once() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 17);
    let leaver = ids[0].clone();

    let events = game.handle_departure(&leaver);
    assert!(!events.is_empty());
    assert!(!game.alive_players().any(|id| *id == leaver));
    assert!(
        game.view_for(&leaver)
            .dead
            .iter()
            .any(|d| d.player == leaver && d.cause == DeathCause::Leave)
    );

    // Leaving twice is a no-op, not a second death record.
    assert!(game.handle_departure(&leaver).is_empty());
}

#[test_log::test]
fn bodyguard_trade_kills_only_the_bodyguard_and_the_principal_survives() {
    let clock = TestClock::new();
    let ids = players(14);
    let mut settings = default_settings(3, 20);
    settings.enable_bodyguard = true;
    let mut game = start(14, settings, &clock, 71);
    let mut rng = StdRng::seed_from_u64(71);

    let mafia = mafia_of(&game, &ids);
    let Some(bodyguard) = role_holder(&game, &ids, Role::Bodyguard) else { return };
    let principal = ids
        .iter()
        .find(|id| **id != mafia && **id != bodyguard)
        .cloned()
        .unwrap();

    run_to_phase(&mut game, &clock, &mut rng, Phase::MafiaAction);
    if game.is_over() {
        return;
    }
    game.submit_night_action(&mafia, Some(principal.clone())).unwrap();

    run_to_phase(&mut game, &clock, &mut rng, Phase::BodyguardAction);
    if game.is_over() {
        return;
    }
    game.submit_night_action(&bodyguard, Some(principal.clone())).unwrap();

    run_to_phase(&mut game, &clock, &mut rng, Phase::DayDiscussion);
    if game.is_over() {
        return;
    }

    assert!(
        game.alive_players().any(|id| *id == principal),
        "the bodyguard's protection must save the principal, not just redirect the kill"
    );
    assert!(
        !game.alive_players().any(|id| *id == bodyguard),
        "the bodyguard trades their own life for the principal's"
    );
    assert!(
        game.view_for(&bodyguard)
            .dead
            .iter()
            .any(|d| d.player == bodyguard && d.cause == DeathCause::BodyguardTrade)
    );
    assert!(
        !game.view_for(&principal).dead.iter().any(|d| d.player == principal),
        "the principal must not also appear in the death list"
    );
}

#[test_log::test]
fn silence_covers_only_the_day_immediately_following_the_night_it_was_cast() {
    let clock = TestClock::new();
    let ids = players(6);
    let mut settings = default_settings(3, 20);
    settings.enable_silencer = true;
    let mut game = start(6, settings, &clock, 29);
    let mut rng = StdRng::seed_from_u64(29);

    let Some(silencer) = role_holder(&game, &ids, Role::Silencer) else { return };
    let target = ids.iter().find(|id| **id != silencer).cloned().unwrap();

    run_to_phase(&mut game, &clock, &mut rng, Phase::SilencerAction);
    if game.is_over() {
        return;
    }
    game.submit_night_action(&silencer, Some(target.clone())).unwrap();

    run_to_phase(&mut game, &clock, &mut rng, Phase::DayDiscussion);
    if game.is_over() {
        return;
    }
    assert!(game.is_silenced(&target), "silence must hold for the day immediately after it was cast");

    // Leave this DayDiscussion and come back around to the next one, without
    // the Silencer acting again.
    tick(&mut game, &clock, &mut rng);
    run_to_phase(&mut game, &clock, &mut rng, Phase::DayDiscussion);
    if game.is_over() {
        return;
    }
    assert!(!game.is_silenced(&target), "silence must not carry over into a second day");
}

#[test_log::test]
fn doctor_cannot_submit_themselves_as_the_protect_target() {
    let clock = TestClock::new();
    let ids = players(4);
    let mut game = start(4, default_settings(3, 20), &clock, 31);
    let mut rng = StdRng::seed_from_u64(31);

    let doctor = role_holder(&game, &ids, Role::Doctor).expect("doctor present at n=4");

    run_to_phase(&mut game, &clock, &mut rng, Phase::DoctorAction);
    if game.is_over() {
        return;
    }

    let err = game.submit_night_action(&doctor, Some(doctor.clone()));
    assert!(matches!(err, Err(MafiaGameError::InvalidTarget(_))));
}

#[test_log::test]
fn mafia_cannot_submit_a_teammate_as_the_kill_target() {
    let clock = TestClock::new();
    let ids = players(9);
    let mut settings = default_settings(3, 20);
    settings.enable_godfather = true;
    let mut game = start(9, settings, &clock, 37);
    let mut rng = StdRng::seed_from_u64(37);

    let mafia = mafia_of(&game, &ids);
    let Some(teammate) = ids
        .iter()
        .find(|id| **id != mafia && game.team_of_public(id) == Some(Team::Mafia))
        .cloned()
    else {
        return;
    };

    run_to_phase(&mut game, &clock, &mut rng, Phase::MafiaAction);
    if game.is_over() {
        return;
    }

    let err = game.submit_night_action(&mafia, Some(teammate));
    assert!(matches!(err, Err(MafiaGameError::InvalidTarget(_))));
}

#[test_log::test]
fn jester_win_is_distinguishable_from_a_draw() {
    let clock = TestClock::new();
    let ids = players(9);
    let mut settings = default_settings(3, 20);
    settings.enable_jester = true;
    let mut game = start(9, settings, &clock, 41);
    let mut rng = StdRng::seed_from_u64(41);

    let Some(jester) = role_holder(&game, &ids, Role::Jester) else { return };

    run_to_phase(&mut game, &clock, &mut rng, Phase::Voting);
    if game.is_over() {
        return;
    }
    for voter in game.alive_players().cloned().collect::<Vec<_>>() {
        game.cast_vote(&voter, Some(jester.clone()), &clock, &mut rng).unwrap();
    }

    assert!(game.is_over(), "the vote-eliminated Jester must end the game immediately");
    let outcome = game.view_for(&jester).pending_win.expect("game over leaves a pending outcome");
    assert_eq!(outcome.condition, WinCondition::JesterWins);
    assert_eq!(outcome.winning_team, Some(Team::Neutral));
    assert_eq!(outcome.winning_players, vec![jester]);
    assert_ne!(
        outcome.condition,
        WinCondition::Draw,
        "a Jester win must not be reported the same way as a zero-survivor draw"
    );
}
