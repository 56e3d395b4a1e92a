pub mod callback;
pub mod message;

use teloxide::{dispatching::UpdateHandler, prelude::*};

use crate::bot::commands::Command;
use crate::services::AppContext;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

pub struct BotHandler {
    pub ctx: AppContext,
}

impl BotHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Commands first, then any other message, then button presses.
    pub fn schema(&self) -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
        let ctx_command = self.ctx.clone();
        let ctx_message = self.ctx.clone();
        let ctx_callback = self.ctx.clone();

        dptree::entry()
            .branch(
                Update::filter_message()
                    .filter_command::<Command>()
                    .endpoint(move |msg: Message, cmd: Command| {
                        let ctx = ctx_command.clone();
                        async move { message::command_handler(msg, cmd, ctx).await }
                    }),
            )
            .branch(Update::filter_message().endpoint(move |msg: Message| {
                let ctx = ctx_message.clone();
                async move { message::message_handler(msg, ctx).await }
            }))
            .branch(
                Update::filter_callback_query().endpoint(move |q: CallbackQuery| {
                    let ctx = ctx_callback.clone();
                    async move { callback::callback_handler(q, ctx).await }
                }),
            )
    }
}
