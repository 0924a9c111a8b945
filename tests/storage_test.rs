mod common;

use openchat::storage::{ImageRef, Theme, NEW_CHAT_TITLE, THINKING_PLACEHOLDER};
use openchat::types::{ChatMessage, Citation, CitationMap, Role};

#[test]
fn test_chat_turn_persists_across_reopen() {
    let (storage, tmp) = common::create_temp_storage();

    let id = storage.create_conversation("zai-org-glm-5").unwrap();
    storage
        .add_message(&id, "zai-org-glm-5", Role::User, "What is Rust?", None)
        .unwrap();
    let reply_id = storage
        .add_message(
            &id,
            "zai-org-glm-5",
            Role::Assistant,
            THINKING_PLACEHOLDER,
            None,
        )
        .unwrap();

    let mut citations = CitationMap::new();
    citations.insert(
        "0".to_string(),
        Citation {
            id: "0".to_string(),
            url: Some("https://www.rust-lang.org".to_string()),
            title: Some("Rust".to_string()),
            ..Default::default()
        },
    );
    assert!(storage
        .update_message(&id, &reply_id, "A systems language [1].", Some(&citations))
        .unwrap());
    drop(storage);

    let reopened =
        openchat::storage::SqliteStorage::new_with_path(tmp.path().join("openchat.db")).unwrap();
    let conversation = reopened.get_conversation(&id).unwrap().unwrap();
    assert_eq!(conversation.title, "What is Rust?");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content, "A systems language [1].");
    assert_eq!(
        conversation.messages[1]
            .citations
            .as_ref()
            .and_then(|c| c.get("0"))
            .and_then(|c| c.url.as_deref()),
        Some("https://www.rust-lang.org")
    );
    assert_eq!(
        reopened.current_conversation_id().unwrap().as_deref(),
        Some(id.as_str())
    );
}

#[test]
fn test_context_window_skips_placeholder_and_keeps_recent() {
    let (storage, _tmp) = common::create_temp_storage();
    let id = storage.create_conversation("m").unwrap();

    for i in 0..4 {
        storage
            .add_message(&id, "m", Role::User, &format!("question {}", i), None)
            .unwrap();
        storage
            .add_message(&id, "m", Role::Assistant, &format!("answer {}", i), None)
            .unwrap();
    }
    storage
        .add_message(&id, "m", Role::User, "latest", None)
        .unwrap();
    storage
        .add_message(&id, "m", Role::Assistant, THINKING_PLACEHOLDER, None)
        .unwrap();

    let pending = vec![ChatMessage::new(Role::User, "latest")];
    let messages = storage.messages_for_api(&id, &pending, 5).unwrap();

    assert_eq!(messages.len(), 5);
    assert_eq!(messages.last().unwrap().content, "latest");
    assert_eq!(messages.first().unwrap().content, "question 2");
    assert!(messages.iter().all(|m| m.content != THINKING_PLACEHOLDER));
}

#[test]
fn test_image_message_title_and_cleanup() {
    let (storage, _tmp) = common::create_temp_storage();
    let id = storage.create_conversation("qwen-vl").unwrap();

    let image_id = storage.store_image(&[0x89, b'P', b'N', b'G'], "image/png").unwrap();
    let image = ImageRef {
        id: image_id.clone(),
        mime: "image/png".to_string(),
        name: Some("chart.png".to_string()),
    };
    storage
        .add_message(&id, "qwen-vl", Role::User, "", Some(&image))
        .unwrap();

    let conversation = storage.get_conversation(&id).unwrap().unwrap();
    assert_ne!(conversation.title, NEW_CHAT_TITLE);
    assert_eq!(
        conversation.messages[0].image_name.as_deref(),
        Some("chart.png")
    );
    assert!(storage.get_image(&image_id).unwrap().is_some());

    storage.clear_conversation(&id).unwrap();
    assert!(storage.get_image(&image_id).unwrap().is_none());
    let cleared = storage.get_conversation(&id).unwrap().unwrap();
    assert!(cleared.messages.is_empty());
    assert_eq!(cleared.title, NEW_CHAT_TITLE);
}

#[test]
fn test_settings_survive_reopen() {
    let (storage, tmp) = common::create_temp_storage();

    storage.set_setting("theme", "dark").unwrap();
    storage.set_setting("webSearchEnabled", "off").unwrap();
    storage.set_setting("selectedModel", "llama-3.3-70b").unwrap();
    storage.set_setting("deploymentPassword", "hunter2").unwrap();
    storage.set_tos_accepted(true).unwrap();
    drop(storage);

    let reopened =
        openchat::storage::SqliteStorage::new_with_path(tmp.path().join("openchat.db")).unwrap();
    assert_eq!(reopened.theme().unwrap(), Theme::Dark);
    assert!(!reopened.web_search_enabled().unwrap());
    assert_eq!(
        reopened.selected_model("zai-org-glm-5").unwrap(),
        "llama-3.3-70b"
    );
    assert_eq!(reopened.deployment_password().unwrap(), "hunter2");
    assert!(reopened.tos_accepted().unwrap());

    reopened.set_setting("deploymentPassword", "").unwrap();
    assert_eq!(reopened.deployment_password().unwrap(), "");
}

#[test]
fn test_unknown_setting_is_rejected() {
    let (storage, _tmp) = common::create_temp_storage();
    let err = storage.set_setting("fontSize", "12").unwrap_err();
    assert!(err.to_string().contains("fontSize"));
    assert!(storage.set_setting("sidebarCollapsed", "maybe").is_err());
}
