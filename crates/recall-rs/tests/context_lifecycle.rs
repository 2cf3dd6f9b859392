//! End-to-end session lifecycle across contexts and backends.

use recall_rs::prelude::*;
use recall_rs::driver::MemoryDriver;

fn memory_registry() -> Arc<DriverRegistry> {
    Arc::new(DriverRegistry::new().with("memory", MemoryDriver::new()))
}

fn ledger(agent: &str, registry: &DriverRegistry) -> IdentityStorage {
    let manager = StorageManager::resolve(&["memory".into()], registry).unwrap();
    IdentityStorage::for_agent(agent, manager)
}

#[test]
fn history_survives_into_a_fresh_context() {
    let registry = memory_registry();
    let identity = SessionIdentity::new("support-bot")
        .with_chat("ticket-42")
        .with_user("u-17");

    let mut first = Context::new(identity.clone(), registry.clone(), vec!["memory".into()]).unwrap();
    let history = first.make::<ChatHistory>().unwrap();
    history.add(Message::system("Be concise."));
    history.add(Message::user("My order never arrived."));
    history.add(Message::assistant_text("Sorry to hear that. Checking now."));
    first.save().unwrap();

    let mut second = Context::new(identity, registry, vec!["memory".into()]).unwrap();
    let history = second.make::<ChatHistory>().unwrap();
    let texts: Vec<&str> = history.get().iter().map(Message::text).collect();
    assert_eq!(
        texts,
        [
            "Be concise.",
            "My order never arrived.",
            "Sorry to hear that. Checking now."
        ]
    );
    assert!(!history.is_dirty());
}

#[test]
fn ledger_tracks_registered_storages_until_removed() {
    let registry = memory_registry();
    let identity = SessionIdentity::new("support-bot").with_chat("ticket-7");

    let mut context = Context::new(identity, registry.clone(), vec!["memory".into()]).unwrap();
    context.make::<ChatHistory>().unwrap().add(Message::user("hi"));
    context.make::<Preferences>().unwrap().put("tone", "formal");
    context.save().unwrap();

    let session = SessionIdentity::new("support-bot").with_chat("ticket-7");
    let keys = ledger("support-bot", &registry).keys();
    assert_eq!(
        keys,
        [
            session.with_scope("chat_history").key(),
            session.with_scope("preferences").key()
        ]
    );

    context.remove().unwrap();
    assert!(ledger("support-bot", &registry).keys().is_empty());
}

#[test]
fn other_sessions_keep_their_ledger_entries() {
    let registry = memory_registry();
    let mut a = Context::new(
        SessionIdentity::new("bot").with_chat("a"),
        registry.clone(),
        vec!["memory".into()],
    )
    .unwrap();
    let mut b = Context::new(
        SessionIdentity::new("bot").with_chat("b"),
        registry.clone(),
        vec!["memory".into()],
    )
    .unwrap();

    a.make::<ChatHistory>().unwrap().add(Message::user("from a"));
    b.make::<ChatHistory>().unwrap().add(Message::user("from b"));
    a.save().unwrap();
    b.save().unwrap();
    assert_eq!(ledger("bot", &registry).keys().len(), 2);

    a.remove().unwrap();
    let keys = ledger("bot", &registry).keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(
        keys[0],
        SessionIdentity::new("bot")
            .with_chat("b")
            .with_scope("chat_history")
            .key()
    );
}

#[test]
fn file_backend_round_trip_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecallConfig::default()
        .with_driver(
            "files",
            DriverConfig::File {
                path: dir.path().to_path_buf(),
            },
        )
        .with_default_drivers(["files"]);
    let identity = SessionIdentity::new("notes-bot").with_user("u-1");

    {
        let registry = Arc::new(config.build_registry().unwrap());
        let mut context = Context::from_config(identity.clone(), &config, registry).unwrap();
        context
            .make::<ChatHistory>()
            .unwrap()
            .add(Message::user("remember the milk"));
        context.save().unwrap();
    }

    // A new registry means nothing is shared in memory; the data must come
    // back from disk.
    let registry = Arc::new(config.build_registry().unwrap());
    let mut context = Context::from_config(identity, &config, registry).unwrap();
    let history = context.make::<ChatHistory>().unwrap();
    assert_eq!(history.count(), 1);
    assert_eq!(history.last().map(Message::text), Some("remember the milk"));
}

#[test]
fn manager_removes_one_users_sessions_across_chats() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecallConfig::default()
        .with_driver(
            "db",
            DriverConfig::SqliteMessages {
                path: dir.path().join("recall.db"),
            },
        )
        .with_default_drivers(["db"]);
    let registry = Arc::new(config.build_registry().unwrap());

    for (chat, user) in [("c1", "alice"), ("c2", "alice"), ("c3", "bob")] {
        let identity = SessionIdentity::new("bot").with_chat(chat).with_user(user);
        let mut context = Context::from_config(identity, &config, registry.clone()).unwrap();
        context
            .make::<ChatHistory>()
            .unwrap()
            .add(Message::user(format!("{user} in {chat}")));
        context.save().unwrap();
    }

    let factory_config = config.clone();
    let factory_registry = registry.clone();
    let rebuild = move |session: &SessionIdentity| {
        Context::from_config(session.clone(), &factory_config, factory_registry.clone())
    };

    let removed = ContextManager::for_agent(
        "bot",
        config.default_manager(&registry).unwrap(),
        rebuild.clone(),
    )
    .for_user("alice")
    .remove()
    .unwrap();
    assert_eq!(removed, 2);

    let mut remaining =
        ContextManager::for_agent("bot", config.default_manager(&registry).unwrap(), rebuild);
    let sessions = remaining.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_id.as_deref(), Some("bob"));

    let mut bob = remaining.first().unwrap().unwrap();
    let history = bob.make::<ChatHistory>().unwrap();
    assert_eq!(history.last().map(Message::text), Some("bob in c3"));
}
