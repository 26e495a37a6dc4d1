use chrono::{TimeZone, Utc};
use laserpresets_core::bridge::{lock, Background, BridgeMessage, SharedBackground};
use laserpresets_core::config::DEFAULT_CLOUD_QUOTA;
use laserpresets_core::controller::{MSG_DUPLICATE, MSG_EDIT_CONFLICT};
use laserpresets_core::material::{
    CutSetting, FormattedMaterial, MaterialField, RawMaterial, TubeType,
};
use laserpresets_core::{CloudMirror, Controller, EditorMode, LocalStore, MaterialId, PresetError};

fn editor(store: &LocalStore) -> (Controller, SharedBackground) {
    let background = Background::shared(store.clone(), 64);
    let mut controller = Controller::new(
        store.clone(),
        CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA),
        background.clone(),
    );
    controller.load().unwrap();
    (controller, background)
}

fn enter(controller: &mut Controller, thick: &str, name: &str, thickness: f64, power: f64) {
    controller.update_material(MaterialField::ThickName(thick.to_string()));
    controller.update_material(MaterialField::Name(name.to_string()));
    controller.update_material(MaterialField::Thickness(thickness));
    controller.update_material(MaterialField::Cut(CutSetting {
        power,
        speed: 200.0,
        passes: 1,
        focal_offset: 0.0,
    }));
}

fn add(controller: &mut Controller, thick: &str, name: &str) -> laserpresets_core::Result<MaterialId> {
    controller.set_editor_mode_add(None)?;
    enter(controller, thick, name, 3.2, 50.0);
    controller.add_material()
}

fn titles(store: &LocalStore) -> Vec<String> {
    store
        .get_raw_materials()
        .unwrap()
        .iter()
        .map(|m| m.title())
        .collect()
}

#[test]
fn test_add_two_then_reject_duplicate() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);

    add(&mut controller, "1/8in", "Maple").unwrap();
    add(&mut controller, "1/4in", "Walnut").unwrap();
    assert_eq!(titles(&store), vec!["1/8in Maple", "1/4in Walnut"]);
    assert_eq!(store.get_materials().unwrap().len(), 2);

    let before = store.get_local_storage().unwrap();
    let err = add(&mut controller, "1/8in", "Maple").unwrap_err();
    assert!(matches!(err, PresetError::Duplicate(_)), "got {:?}", err);
    assert_eq!(controller.notice().unwrap().message, MSG_DUPLICATE);

    let after = store.get_local_storage().unwrap();
    assert_eq!(before.materials, after.materials, "host list must not change");
    assert_eq!(before.raw_materials, after.raw_materials, "raw list must not change");
}

#[test]
fn test_edit_keeps_id_and_updates_fields() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    let id = add(&mut controller, "1/8in", "Maple").unwrap();

    controller.set_editor_mode_edit("1/8in Maple").unwrap();
    assert_eq!(controller.mode(), EditorMode::Edit);
    enter(&mut controller, "1/8in", "Hard Maple", 3.4, 65.0);
    let kept = controller.edit_material("1/8in Maple").unwrap();
    assert_eq!(kept, id);

    let doc = store.get_local_storage().unwrap();
    assert_eq!(doc.materials.len(), 1);
    assert_eq!(doc.materials[0].id, id, "edit must keep the original id");
    assert_eq!(doc.materials[0].title, "1/8in Hard Maple");
    assert_eq!(doc.materials[0].nominal_thickness, 3.4);
    assert_eq!(doc.raw_materials[0].cut.power, 65.0);
    assert_eq!(
        titles(&store)
            .iter()
            .filter(|t| t.as_str() == "1/8in Hard Maple")
            .count(),
        1
    );
    assert_eq!(controller.mode(), EditorMode::Selected);
}

#[test]
fn test_edit_onto_existing_title_is_rejected() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    add(&mut controller, "1/8in", "Maple").unwrap();
    add(&mut controller, "1/8in", "Walnut").unwrap();

    controller.set_editor_mode_edit("1/8in Walnut").unwrap();
    controller.update_material(MaterialField::Name("Maple".to_string()));
    let err = controller.edit_material("1/8in Walnut").unwrap_err();
    assert!(matches!(err, PresetError::Duplicate(_)));
    assert_eq!(titles(&store), vec!["1/8in Maple", "1/8in Walnut"]);
}

#[test]
fn test_edit_of_ambiguous_title_is_rejected() {
    // Older documents could hold the same title twice.
    let maple = RawMaterial::new("1/8in", "Maple", 3.2, CutSetting::default());
    let formatted = FormattedMaterial::from_raw(&maple, &MaterialId::from_title(&maple.title()));
    let store = LocalStore::in_memory();
    store
        .store_catalog(
            vec![formatted.clone(), formatted],
            vec![maple.clone(), maple],
        )
        .unwrap();
    let (mut controller, _) = editor(&store);
    assert_eq!(controller.catalog().count_title("1/8in Maple"), 2);

    controller.set_editor_mode_add(None).unwrap();
    enter(&mut controller, "1/8in", "Maple", 3.4, 70.0);
    let before = store.get_local_storage().unwrap();
    let err = controller.edit_material("1/8in Maple").unwrap_err();
    assert!(matches!(err, PresetError::Duplicate(_)), "got {:?}", err);
    assert_eq!(controller.notice().unwrap().message, MSG_EDIT_CONFLICT);
    assert_eq!(store.get_local_storage().unwrap(), before, "nothing is saved");
}

#[test]
fn test_edit_of_missing_title_is_rejected() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    add(&mut controller, "1/8in", "Maple").unwrap();

    controller.set_editor_mode_add(None).unwrap();
    enter(&mut controller, "1/8in", "Oak", 3.2, 50.0);
    let err = controller.edit_material("1/8in Oak").unwrap_err();
    assert!(matches!(err, PresetError::Duplicate(_)), "got {:?}", err);
    assert_eq!(controller.notice().unwrap().message, MSG_EDIT_CONFLICT);
    assert_eq!(titles(&store), vec!["1/8in Maple"]);
}

#[test]
fn test_add_collides_with_id_kept_by_rename() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    let id = add(&mut controller, "1/8in", "Maple").unwrap();

    controller.set_editor_mode_edit("1/8in Maple").unwrap();
    enter(&mut controller, "1/8in", "Hard Maple", 3.2, 50.0);
    assert_eq!(controller.edit_material("1/8in Maple").unwrap(), id);

    // The old title is free, but its id is still taken.
    let err = add(&mut controller, "1/8in", "Maple").unwrap_err();
    assert!(matches!(err, PresetError::Duplicate(_)), "got {:?}", err);
    assert_eq!(controller.notice().unwrap().message, MSG_DUPLICATE);
    assert_eq!(titles(&store), vec!["1/8in Hard Maple"]);
}

#[test]
fn test_remove_present_and_absent_titles() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    add(&mut controller, "1/8in", "Maple").unwrap();
    add(&mut controller, "1/4in", "Walnut").unwrap();

    assert!(controller.remove_material("1/8in Maple").unwrap());
    assert_eq!(titles(&store), vec!["1/4in Walnut"]);
    assert_eq!(store.get_materials().unwrap().len(), 1);
    assert_eq!(controller.mode(), EditorMode::Display);

    let before = store.get_local_storage().unwrap();
    assert!(!controller.remove_material("1/8in Maple").unwrap());
    assert_eq!(store.get_local_storage().unwrap(), before);

    // Same at the store level.
    store.remove_material_by_title("nothing").unwrap();
    store.remove_raw_material_by_title("nothing").unwrap();
    assert_eq!(store.get_local_storage().unwrap(), before);
}

#[test]
fn test_document_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.json");
    let store = LocalStore::open(&path);
    let (mut controller, _) = editor(&store);
    add(&mut controller, "1/8in", "Maple").unwrap();
    add(&mut controller, "1/4in", "Walnut").unwrap();
    add(&mut controller, "3mm", "Acrylic").unwrap();

    let written = store.get_local_storage().unwrap();
    let reread = LocalStore::open(&path).get_local_storage().unwrap();
    assert_eq!(written.materials, reread.materials);
    assert_eq!(written.raw_materials, reread.raw_materials);
    assert_eq!(
        titles(&LocalStore::open(&path)),
        vec!["1/8in Maple", "1/4in Walnut", "3mm Acrylic"],
        "order must be preserved"
    );
}

#[test]
fn test_backup_then_restore_reproduces_capture() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    add(&mut controller, "1/8in", "Maple").unwrap();
    let captured = store.get_local_storage().unwrap();

    let name = controller
        .create_backup(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        .unwrap();
    assert_eq!(name, "2024-03-01T12:00:00.000Z");
    assert_eq!(controller.backups(), &[name.clone()]);

    add(&mut controller, "1/4in", "Walnut").unwrap();
    controller.remove_material("1/8in Maple").unwrap();

    controller.restore_backup(&name).unwrap();
    let restored = store.get_local_storage().unwrap();
    assert_eq!(restored.materials, captured.materials);
    assert_eq!(restored.raw_materials, captured.raw_materials);
    assert!(restored.backup.unwrap().contains_key(&name));
    assert_eq!(controller.catalog().len(), 1);

    let snapshot = store.get_backup(&name).unwrap().unwrap();
    assert!(snapshot.backup.is_none(), "backups never nest");
}

#[test]
fn test_maple_scenario() {
    let store = LocalStore::in_memory();
    let (mut controller, _) = editor(&store);
    let id = add(&mut controller, "1/8in", "Maple").unwrap();

    let materials = store.get_materials().unwrap();
    assert_eq!(materials.len(), 1);
    let maple = &materials[0];
    assert_eq!(maple.id, id);
    assert!(maple.id.as_str().starts_with("Custom:"));
    assert_eq!(maple.id.hash().len(), 7);
    assert_eq!(maple.title, "1/8in Maple");
    assert_eq!(maple.settings.len(), 2);
    for tube in TubeType::ALL {
        let settings = maple.settings_for(tube).unwrap();
        assert_eq!(settings.cut_setting.power, 50.0);
        assert_eq!(settings.cut_setting.speed, 200.0);
        let names: Vec<&str> = settings
            .score_settings
            .iter()
            .map(|s| s.outcome.name.as_str())
            .collect();
        assert_eq!(names, vec!["High Quality", "Shallow"]);
    }
}

#[test]
fn test_should_update_shows_as_unsynchronized_until_page_poll() {
    let store = LocalStore::in_memory();
    let (mut controller, background) = editor(&store);
    assert!(controller.synchronized());

    add(&mut controller, "1/8in", "Maple").unwrap();
    assert!(store.get_should_update().unwrap());
    controller.tick(Utc::now()).unwrap();
    assert!(!controller.synchronized());

    let response = lock(&background).unwrap().material_check().unwrap();
    assert!(response
        .messages
        .iter()
        .any(|e| matches!(e.message, BridgeMessage::SetMaterials { .. })));
    assert!(!store.get_should_update().unwrap());

    assert!(controller.tick(Utc::now()).unwrap());
    assert!(controller.synchronized());
}

#[test]
fn test_cloud_merge_marks_unsynchronized_in_same_tick() {
    let cloud = CloudMirror::in_memory(DEFAULT_CLOUD_QUOTA);
    let open = |store: &LocalStore| {
        let background = Background::shared(store.clone(), 64);
        let mut controller = Controller::new(store.clone(), cloud.clone(), background);
        controller.load().unwrap();
        controller
    };
    let first_store = LocalStore::in_memory();
    let mut first = open(&first_store);
    first.set_editor_mode_add(None).unwrap();
    enter(&mut first, "1/8in", "Maple", 3.2, 50.0);
    first.update_material(MaterialField::Sync(true));
    first.add_material().unwrap();

    let second_store = LocalStore::in_memory();
    let mut second = open(&second_store);
    assert!(second.synchronized());
    assert!(second.tick(Utc::now()).unwrap());
    assert_eq!(second.catalog().len(), 1);
    assert!(!second.synchronized(), "the page has not seen the merged list yet");
}
